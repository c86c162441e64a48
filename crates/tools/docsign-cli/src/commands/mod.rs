pub mod document;
pub mod identity;
pub mod sign;
pub mod template;

pub use document::{handle_directors_command, handle_document_command, DirectorsCmd, DocumentCmd};
pub use identity::{handle_identity_command, IdentityCmd};
pub use sign::{handle_sign, handle_verify, SignArgs, VerifyArgs};
pub use template::{handle_template_command, TemplateCmd};
