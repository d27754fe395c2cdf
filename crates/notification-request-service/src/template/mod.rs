//! 模板渲染与缓存

pub mod cache;
pub mod renderer;
pub mod substitution;

pub use cache::{TemplateCache, TemplateKey};
pub use renderer::{TemplateRenderer, fill};
pub use substitution::{has_placeholders, substitute};
