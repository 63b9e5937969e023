//! External collaborator contracts consumed by the hub

pub mod locale;
pub mod translation;

pub use locale::{LocaleInfo, LocaleLookup, StaticLocaleLookup};
pub use translation::{IdentityTranslator, Translator};
