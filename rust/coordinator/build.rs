fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .emit_rerun_if_changed(true)
        .compile(&["proto/heap.proto"], &["proto/"])?;
    Ok(())
}
