pub use self::{command::*, descriptor::*, pipeline::*, render::*, sync::*};

mod command;
mod descriptor;
mod pipeline;
mod render;
mod sync;
