pub mod driver;
pub mod mesh;
pub mod pipeline;
pub mod readback;
pub mod renderer;
