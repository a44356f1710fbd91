//! Platform Abstraction Layer (PAL). Everything the harness needs from the operating system and
//! the memory allocator goes through here, so that the snapshot logic can be tested against mocks.

mod abstractions;
pub(crate) use abstractions::*;

mod facade;
pub(crate) use facade::*;

mod real;
pub(crate) use real::*;
