use std::fs::{self, OpenOptions};
use std::path::Path;
use log::info;

use ds_core::BLOCK_SIZE;

/// Create `path` if missing and make sure it holds at least `blocks` blocks.
/// Existing contents are kept; new space reads as zero.
pub fn provision_image<P: AsRef<Path>>(path: P, blocks: u32) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let file = OpenOptions::new().write(true).create(true).open(path)?;
    let want = blocks as u64 * BLOCK_SIZE as u64;
    let have = file.metadata()?.len();
    if have < want {
        info!(">>> [SETUP] Growing {} to {} blocks", path.display(), blocks);
        file.set_len(want)?;
        file.sync_all()?;
    }
    Ok(())
}

/// Whole blocks held by the image at `path`.
pub fn image_blocks<P: AsRef<Path>>(path: P) -> anyhow::Result<u32> {
    let len = fs::metadata(path)?.len();
    let blocks = u32::try_from(len / BLOCK_SIZE as u64)
        .map_err(|_| anyhow::anyhow!("image holds more than {} blocks", u32::MAX))?;
    Ok(blocks)
}
