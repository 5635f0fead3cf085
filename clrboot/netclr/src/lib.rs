//! .NET CoreCLR hosting for the bootstrapper

mod hosting;

pub use hosting::{DotNetHost, InitializeFn};
