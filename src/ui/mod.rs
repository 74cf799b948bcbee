pub mod illust;
pub mod screen;
pub mod search;
pub mod status;
pub mod ui;
