use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only cargo metadata; git isn't available when building a published crate
    EmitBuilder::builder().all_cargo().emit()?;

    Ok(())
}
