mod auth;
mod courses;
mod reviews;

pub use auth::auth_router;
pub use courses::courses_router;
pub use reviews::reviews_router;

pub struct PageLink {
    pub number: u32,
    pub current: bool,
    pub href: String,
}

fn page_links(total_pages: u32, current: u32, href: impl Fn(u32) -> String) -> Vec<PageLink> {
    (1..=total_pages)
        .map(|number| PageLink {
            number,
            current: number == current,
            href: href(number),
        })
        .collect()
}

fn query_string(pairs: &[(&str, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}
