pub mod footer;
pub mod header;
pub mod pager;
pub mod utils;

pub use footer::draw_footer;
pub use header::{draw_header, CacheStats};
pub use pager::draw_pager;
pub use utils::{age, centered, error_message, format_price, format_size, status_color, truncate};
