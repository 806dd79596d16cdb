mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{course, spawn_app, user, user_with_password, PASSWORD};
use course_reviews::db::queries::courses::get_course;
use course_reviews::db::queries::images::get_image;

const BOUNDARY: &str = "course-form-boundary";

fn multipart_body(fields: &[(&str, &str)], image: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"background_img\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn create_request(cookie: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::post("/courses/create").header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\0\x10JFIF\0";

const COURSE_FIELDS: [(&str, &str); 4] = [
    ("name", "PYTHON С НУЛЯ"),
    ("category_id", "1"),
    ("short_desc", "Базовый курс по Python"),
    ("full_desc", "Полное описание Python курса"),
];

#[tokio::test]
async fn new_course_form_requires_login() {
    let app = spawn_app().await;
    let response = app.get("/courses/new", None).await;
    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(response.location(), "/login?next=%2Fcourses%2Fnew");

    let response = app
        .send(create_request(None, multipart_body(&COURSE_FIELDS, None)))
        .await;
    assert_eq!(response.status, StatusCode::FOUND);
}

#[tokio::test]
async fn create_course_with_image() {
    let app = spawn_app().await;
    let author = user_with_password(&app.pool, "user3").await;
    let cookie = app.login("user3", PASSWORD).await;

    let body = multipart_body(
        &COURSE_FIELDS,
        Some(("bg.JPG", "image/jpeg", JPEG)),
    );
    let response = app.send(create_request(Some(&cookie), body)).await;
    assert_eq!(response.status, StatusCode::SEE_OTHER, "{}", response.body);
    let course_id: i64 = response
        .location()
        .trim_start_matches("/courses/")
        .parse()
        .unwrap();

    let created = get_course(&app.pool, course_id).await.unwrap();
    assert_eq!(created.author_id, author.id);
    assert_eq!((created.rating_sum, created.rating_num), (0, 0));
    let image = get_image(&app.pool, created.background_image_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(image.mime_type, "image/jpeg");
    assert!(image.storage_filename().ends_with(".jpg"));
    assert_eq!(image.object_type.as_deref(), Some("course"));
    assert_eq!(image.object_id, Some(course_id));
    assert!(app
        .static_dir
        .path()
        .join("images")
        .join(image.storage_filename())
        .exists());

    let page = app.get(&format!("/courses/{course_id}"), Some(&cookie)).await;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("PYTHON С НУЛЯ"));
    assert!(page.body.contains(&image.storage_filename()));

    // same bytes again reuse the stored image
    let body = multipart_body(
        &COURSE_FIELDS,
        Some(("copy.jpg", "image/jpeg", JPEG)),
    );
    let response = app.send(create_request(Some(&cookie), body)).await;
    let second_id: i64 = response
        .location()
        .trim_start_matches("/courses/")
        .parse()
        .unwrap();
    let second = get_course(&app.pool, second_id).await.unwrap();
    assert_eq!(second.background_image_id, created.background_image_id);
}

#[tokio::test]
async fn create_course_rejects_non_images_and_blank_fields() {
    let app = spawn_app().await;
    user_with_password(&app.pool, "user3").await;
    let cookie = app.login("user3", PASSWORD).await;

    let body = multipart_body(&COURSE_FIELDS, Some(("notes.txt", "text/plain", &b"hello"[..])));
    let response = app.send(create_request(Some(&cookie), body)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let fields = [
        ("name", "  "),
        ("category_id", "1"),
        ("short_desc", "x"),
        ("full_desc", "y"),
    ];
    let response = app
        .send(create_request(Some(&cookie), multipart_body(&fields, None)))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body.contains("Заполните название"));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM courses")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn upload_type_comes_from_file_contents() {
    let app = spawn_app().await;
    user_with_password(&app.pool, "user3").await;
    let cookie = app.login("user3", PASSWORD).await;

    // markup declared as a png is refused
    let body = multipart_body(
        &COURSE_FIELDS,
        Some(("evil.html", "image/png", &b"<script>alert(document.domain)</script>"[..])),
    );
    let response = app.send(create_request(Some(&cookie), body)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(!app.static_dir.path().join("images").exists()
        || std::fs::read_dir(app.static_dir.path().join("images")).unwrap().count() == 0);

    // a real image keeps an image extension whatever the client calls it
    let body = multipart_body(&COURSE_FIELDS, Some(("evil.html", "text/html", JPEG)));
    let response = app.send(create_request(Some(&cookie), body)).await;
    assert_eq!(response.status, StatusCode::SEE_OTHER, "{}", response.body);
    let course_id: i64 = response
        .location()
        .trim_start_matches("/courses/")
        .parse()
        .unwrap();
    let created = get_course(&app.pool, course_id).await.unwrap();
    let image = get_image(&app.pool, created.background_image_id.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(image.mime_type, "image/jpeg");
    let stored: Vec<String> = std::fs::read_dir(app.static_dir.path().join("images"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(stored, vec![format!("{}.jpg", image.id)]);

    let served = app
        .get(&format!("/static/images/{}", image.storage_filename()), None)
        .await;
    assert_eq!(served.status, StatusCode::OK);
    assert_eq!(
        served.headers.get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
}

#[tokio::test]
async fn catalogue_filters_by_name_and_category() {
    let app = spawn_app().await;
    let author = user(&app.pool, "author").await;
    course(&app.pool, &author, "Rust для начинающих").await;
    course(&app.pool, &author, "Python с нуля").await;

    let response = app.get("/courses?name=Rust&category_id=", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("Rust для начинающих"));
    assert!(!response.body.contains("Python с нуля"));

    let response = app.get("/?category_id=2", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("Курсы не найдены"));

    let response = app.get("/", None).await;
    assert!(response.body.contains("Rust для начинающих"));
    assert!(response.body.contains("Python с нуля"));
    assert!(response.body.contains("нет оценок"));
}

#[tokio::test]
async fn unknown_course_is_404() {
    let app = spawn_app().await;
    let response = app.get("/courses/404", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = app.get("/no/such/page", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
