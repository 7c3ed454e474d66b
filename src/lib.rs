//! strobe: a thin, stateful command-recording layer over OpenGL/GLES.
//!
//! Client code never issues graphics calls directly. It describes per-frame
//! work — views (render passes), draws, compute dispatches, resource
//! updates — through a [`Context`], and one end-of-frame
//! [`Context::frame`] call replays everything into the native context in a
//! deterministic order: views ascending by id, each view running blits,
//! then compute, then draws, with redundant state changes diffed away.
//!
//! ```no_run
//! use strobe::*;
//!
//! # fn demo(gl: glow::Context) {
//! let backend = NativeBackend::new(gl, false, 33);
//! let mut ctx = Context::new(backend);
//! ctx.reset(1280, 720, ResetFlags::empty());
//!
//! let view = 1;
//! ctx.view_set_clear_color(view, 0x555555ff);
//! ctx.view_set_clear_depth(view, 1.0);
//! ctx.view_set_depth_test(view, DepthTest::Less);
//!
//! let mut fmt = VertexFormat::start();
//! fmt.add(0, 3, false, ComponentType::Float);
//! fmt.add(1, 4, true, ComponentType::Float);
//! fmt.end();
//!
//! let verts: [f32; 21] = [
//!     0.0, 0.5, 0.0, 1.0, 0.0, 0.0, 1.0,
//!     -0.5, -0.5, 0.0, 0.0, 1.0, 0.0, 1.0,
//!     0.5, -0.5, 0.0, 0.0, 0.0, 1.0, 1.0,
//! ];
//! let vbo = ctx.buffer_new(
//!     Some(bytemuck::cast_slice(&verts)),
//!     0,
//!     Some(&fmt),
//!     BufferFlags::empty(),
//! );
//! let program = ctx
//!     .program_new(VS, FS, &["a_position", "a_color"])
//!     .expect("shaders compile");
//!
//! loop {
//!     ctx.touch(view);
//!     ctx.set_vertices(&vbo, 3);
//!     ctx.set_state(DrawFlags::RGB_WRITE | DrawFlags::ALPHA_WRITE);
//!     ctx.submit(view, program, false);
//!     let stats = ctx.frame();
//!     # let _ = stats; break;
//! }
//! # }
//! # const VS: &str = "";
//! # const FS: &str = "";
//! ```
//!
//! Recording is safe from any call site within the frame; `frame()` itself
//! must run on the thread that owns the native context. There is no
//! internal locking and no blocking: GPU synchronization happens only
//! through memory barriers the replay engine inserts when dirty-flag
//! tracking detects a write-then-read hazard.

pub mod backend;
mod buffer;
mod canvas;
mod caps;
mod context;
mod draw;
mod format;
mod frame;
mod program;
mod state;
mod texture;
mod uniform;
mod view;

pub use backend::{GlBackend, NativeBackend, RecordingBackend};
pub use buffer::{Buffer, BufferFlags, TransientBuffer};
pub use canvas::Canvas;
pub use caps::Caps;
pub use context::{Context, Settings};
pub use draw::DrawCallback;
pub use format::{ComponentType, TextureFormat, VertexFormat};
pub use frame::Stats;
pub use program::Program;
pub use state::{DepthTest, DrawFlags, Rect, ResetFlags, ViewFlags};
pub use texture::{Texture, TextureFlags};
pub use uniform::{Uniform, UniformType};
