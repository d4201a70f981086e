pub use self::{buffer::*, image::*, shader::*};

mod buffer;
mod image;
mod shader;
