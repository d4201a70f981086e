pub use self::{adapters::*, context::*, resources::*};

mod adapters;
mod context;
mod resources;
