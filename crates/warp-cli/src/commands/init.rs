use std::path::Path;

use anyhow::bail;
use warp_core::VfsConfig;

pub fn init(path: &str, asset_root: &str, force: bool) -> anyhow::Result<()> {
    let project_path = Path::new(path);
    let output = project_path.join("vfs.toml");
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    std::fs::create_dir_all(project_path.join(asset_root))?;
    std::fs::write(&output, VfsConfig::scaffold(asset_root).to_toml_string()?)?;
    println!("✓ Generated {}", output.display());
    println!("  Assets: {}", project_path.join(asset_root).display());
    Ok(())
}
