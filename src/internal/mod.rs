//! Internal building blocks (object model, object store, refs, index, pack/zlib,
//! metadata) that power the public APIs in `repository`, `protocol`, and `merge`.

pub mod index;
pub mod metadata;
pub mod object;
pub mod pack;
pub mod refs;
pub mod store;
pub mod zlib;
