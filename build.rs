fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=DEVMGMT_REGENERATE_PROTO");
    println!("cargo:rerun-if-changed=proto");

    // Generated code is checked in under src/generated so builds do not need protoc.
    if std::env::var_os("DEVMGMT_REGENERATE_PROTO").is_none() {
        return Ok(());
    }

    tonic_build::configure()
        .out_dir("src/generated")
        .compile_protos(
            &[
                "proto/device_management.proto",
                "proto/asset_management.proto",
                "proto/device_event_management.proto",
            ],
            &["proto"],
        )
        .unwrap_or_else(|e| panic!("protobuf compile error: {e}"));

    Ok(())
}
