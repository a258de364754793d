//! Text front end for a [`poolfs`] filesystem: a line-based command shell,
//! per-session open-file state and JSON images on disk.

pub mod command;
pub mod image;
pub mod logging;
pub mod session;

pub use crate::command::{Command, OpenMode, ParseError};
pub use crate::image::ImageError;
pub use crate::session::{Flow, Session, SessionError};
