//! Compiles the protobuf definitions into Rust code using tonic-build.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=../../proto/knncache.proto");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("knncache_descriptor.bin"))
        .compile_protos(&["../../proto/knncache.proto"], &["../../proto"])?;

    Ok(())
}
