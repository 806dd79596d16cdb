use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use lazy_static::lazy_static;

lazy_static! {
    pub static ref REVIEWS_CNTR: IntCounterVec = register_int_counter_vec!(
        "course_reviews_created_total",
        "Number of reviews posted on courses",
        &["rating"]
    )
    .expect("reviews counter can be registered");
    pub static ref COURSES_CNTR: IntCounter = register_int_counter!(
        "courses_created_total",
        "Number of courses created"
    )
    .expect("courses counter can be registered");
    pub static ref LOGINS_CNTR: IntCounter =
        register_int_counter!("logins_total", "Number of successful logins")
            .expect("logins counter can be registered");
}

pub fn init_tracing() {
    let mut fmt_layer = fmt::layer();
    if std::env::var("INCLUDE_SPAN_EVENTS").is_ok_and(|value| value.eq_ignore_ascii_case("true")) {
        fmt_layer = fmt_layer.with_span_events(FmtSpan::ENTER | FmtSpan::EXIT);
    }
    let filter_layer = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
