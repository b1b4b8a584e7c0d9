//! Native implementations of the transforms used by the built-in site.
//! Each one is a [`Transform`](crate::stage::Transform) and can be swapped
//! for anything else implementing that trait.

mod html;
mod image;
mod scss;
mod script;

pub use self::html::HtmlMinify;
pub use self::image::{ImageOptimize, WebP};
pub use self::scss::{Autoprefix, CssMinify, Sass};
pub use self::script::{Esbuild, Passthrough};
