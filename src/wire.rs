//! Generated protobuf messages for the `nsm` package.
//!
//! With the `transport-grpc` feature this also contains the tonic service
//! stubs (`monitor_connection_server`, `bundle_monitor_client`, ...).

#![allow(missing_docs, clippy::all, clippy::pedantic)]

include!(concat!(env!("OUT_DIR"), "/nsm.rs"));
