fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Source a vendored protoc binary when one is not available on PATH so the
    // build works in environments without a system protobuf compiler.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
    }
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/topolink/v1/deviceplugin.proto"], &["proto"])?;
    Ok(())
}
