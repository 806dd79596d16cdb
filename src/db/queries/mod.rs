pub mod categories;
pub mod courses;
pub mod images;
pub mod reviews;
pub mod users;
