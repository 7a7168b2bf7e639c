//! Wire types for the Sophrosyne gRPC surface.
//!
//! `v1` is the vendored output of `tonic-build` over
//! `proto/sophrosyne/v1/sophrosyne.proto`, checked in so builds do not
//! require `protoc`. Regenerate with `tonic-build` whenever the proto
//! changes and replace `src/gen/sophrosyne.v1.rs` wholesale — never edit
//! the generated file by hand.
//!
//! [`convert`] carries the mappings between entity records and their wire
//! representations.

pub mod convert;

pub mod v1 {
    #![allow(clippy::all)]
    include!("gen/sophrosyne.v1.rs");
}
