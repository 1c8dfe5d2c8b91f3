#![doc = include_str!("../README.md")]

extern crate lightmotif;
extern crate lightmotif_io;

pub mod aggregate;
pub mod background;
pub mod config;
pub mod err;
pub mod genome;
pub mod gmm;
pub mod monitor;
pub mod motif;
pub mod null;
pub mod partition;
pub mod pipeline;
pub mod pool;
pub mod record;
pub mod region;
pub mod results;
pub mod scan;
pub mod signal;
pub mod threshold;
pub mod writer;

pub use config::Config;
pub use config::Naming;
pub use err::Error;
pub use genome::Genome;
pub use genome::SequenceProvider;
pub use motif::MotifFormat;
pub use motif::MotifRecord;
pub use pipeline::BinDetect;
pub use pipeline::Report;
pub use region::Region;
pub use region::RegionList;
pub use signal::Condition;
pub use signal::SignalMap;
pub use signal::SignalReader;
pub use signal::SignalTrack;
