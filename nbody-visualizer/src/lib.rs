//! Frame rendering and video assembly for N-body snapshot stores.

pub mod color;
pub mod figure;
pub mod frames;
pub mod text;
pub mod ticks;
pub mod video;

pub use figure::{
    ArtistId, Axes, BBox, Figure, HAlign, Panel, PanelId, SaveOptions, ScatterStyle, SubplotParams, TextLabel, VAlign,
};
pub use frames::{render_frames, render_store, FrameRenderer, RenderSummary};
pub use video::{assemble_video, VideoSummary};
