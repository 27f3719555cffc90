//! Configuration engine for OGC (WMS/WCS/WMTS) services over a datacube.

pub mod bands;
pub mod bbox;
pub mod cell;
pub mod crs;
pub mod datacube;
pub mod entry;
pub mod error;
pub mod expand;
pub mod flags;
pub mod fragment;
pub mod func;
pub mod global;
pub mod inherit;
pub mod keyed;
pub mod layer;
pub mod metadata;
pub mod products;
pub mod ranges;
pub mod resource_limits;
pub mod source;
pub mod tile;
pub mod time;

pub use bands::BandIndex;
pub use bbox::BoundingBox;
pub use cell::ConfigCell;
pub use crs::{Crs, CrsTable};
pub use datacube::{DatacubeIndex, MemoryIndex, Product, ProductHandle};
pub use entry::{ConfigEntry, Deferred, Readiness};
pub use error::{ConfigError, ConfigResult};
pub use expand::{cfg_expand, ModuleRegistry};
pub use flags::{FlagBand, FlagProductSet};
pub use global::{OwsConfig, Services};
pub use layer::{Folder, LayerKind, LayerNode, NamedLayer, ReadyContext};
pub use metadata::MetadataBearing;
pub use ranges::{LayerRanges, MemoryRangeStore, RangeStore};
pub use resource_limits::{CacheControlRules, ResourceLimits};
pub use source::{read_config, ConfigSource};
pub use tile::{TileMatrix, TileMatrixSet};
pub use time::{DefaultTimeRule, TimeAxis, TimeRes};
