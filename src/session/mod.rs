pub mod store;
pub mod types;

pub use store::{ExpiredForm, SessionGuard, SessionStore};
pub use types::{FormState, Language, LanguagePolicy, Session, Stage};
