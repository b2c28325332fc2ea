pub mod config;
pub mod error;
pub mod slug;
pub mod time;
pub mod types;
pub mod util;

pub use config::Config;
pub use error::TidepoolError;
pub use slug::{filter_tags, is_stop_word, slugify};
pub use time::{DayOfWeek, TimeOfDay, Window};
pub use types::*;
