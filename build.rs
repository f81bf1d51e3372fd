fn main() {
    // Migration resources are embedded into the binary, so their absence is a
    // packaging error rather than something to discover at upgrade time
    use std::path::Path;
    let resources = Path::new("resources/upgrade/db");
    if !resources.exists() {
        eprintln!("\n❌ ERROR: Upgrade resources not found at 'resources/upgrade/db/'\n");
        eprintln!("The SQL migration scripts must be present before compiling the binary.");
        std::process::exit(1);
    }
    println!("cargo:rerun-if-changed=resources/upgrade");

    // Enables static linking of the vcruntime library on Windows builds
    static_vcruntime::metabuild();
}
