fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/nsm.proto");

    // Prefer a vendored protoc to avoid requiring a system installation.
    let protoc_path = protoc_bin_vendored::protoc_bin_path()
        .map_err(|e| format!("failed to locate vendored protoc: {e}"))?;
    std::env::set_var("PROTOC", protoc_path);

    // Messages are always generated. Service stubs reference tonic, so they are
    // only generated when the gRPC transport feature is enabled.
    let grpc = std::env::var_os("CARGO_FEATURE_TRANSPORT_GRPC").is_some();

    tonic_build::configure()
        .build_server(grpc)
        .build_client(grpc)
        .compile_protos(&["proto/nsm.proto"], &["proto/"])?;
    Ok(())
}
