pub mod local_id;
mod user;

pub use user::User;
