//! # Mask Materialization
//!
//! Turns the part mask a vision model describes in preprocessed-image
//! coordinates into a binary pixel mask at the original resolution.
//!
//! ## Core Features
//!
//! - **Encodings**: polygon, pixel runs or bounding box ([`MaskEncoding`])
//! - **Rasterization**: even-odd scanline fill sampled at pixel centres
//! - **Outlines**: contour tracing with holes, exported as GeoJSON
//! - **Overlays**: tint the masked pixels of an RGB image
//!
//! ## Quick Start
//!
//! ```rust
//! use grasp_common::ScaleTransform;
//! use mask::{MaskEncoding, materialize};
//!
//! let transform = ScaleTransform::new((800, 600), (400, 300))?;
//! let encoding = MaskEncoding::Polygon {
//!     points: vec![[230.0, 150.0], [260.0, 150.0], [260.0, 210.0], [230.0, 210.0]],
//! };
//!
//! let mask = materialize(&encoding, &transform)?;
//! assert_eq!((mask.width(), mask.height()), (800, 600));
//! assert_eq!(mask.area(), 7200);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod algorithms;
pub mod error;
pub mod io;
pub mod materialize;
pub mod overlay;
pub mod traits;
pub mod types;

pub use algorithms::*;
pub use error::{MaskError, Result};
pub use materialize::{MaskMaterializer, materialize};
pub use overlay::{draw_boxes, overlay_mask, palette_color};
pub use traits::*;
pub use types::{BinaryMask, ComplexShape, MaskEncoding, MaskOutline, PixelRun};
