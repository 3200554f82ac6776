pub mod pauses;
pub mod responses;
pub mod sessions;

pub use sessions::SessionUpdate;
