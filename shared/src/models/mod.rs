//! Domain models for the Shelter Volunteers platform

mod animal;
mod comment;
mod document;
mod group;
mod notification;
mod seed;
mod settings;
mod user;

pub use animal::*;
pub use comment::*;
pub use document::*;
pub use group::*;
pub use notification::*;
pub use seed::*;
pub use settings::*;
pub use user::*;
