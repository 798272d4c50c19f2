pub mod product;
pub mod product_variant;
pub mod reservation;
pub mod reservation_line;
pub mod sale;
pub mod sale_line;
pub mod session;
pub mod stock_movement;
pub mod user;
