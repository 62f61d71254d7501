//! Stack-merge shell scripts.
//!
//! Every captured focus series gets a block that aligns the slices with
//! `align_image_stack` and fuses them with `enfuse`. The script is written
//! next to the images and sourced by the operator afterwards:
//!
//! ```text
//! rm OUT*.tif
//! echo 'processing: B4a'
//! align_image_stack -m -a OUT rawimages/B4a_0.jpg rawimages/B4a_1.jpg
//! enfuse --exposure-weight=0 --saturation-weight=0 --contrast-weight=1 --hard-mask --output=B4a.tif OUT*.tif
//! rm OUT*.tif
//! ```
//!
//! Each line keeps the trailing space the processing scripts have always had.

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// First line of every script.
pub const SCRIPT_HEADER: &str = "rm OUT*.tif \n";

/// Text block for one focus series.
///
/// `label` is echoed while processing, `images` are referenced relative to the
/// script, and the fused result is written to `<output>.tif`.
pub fn series_block(label: &str, images: &[String], output: &str) -> String {
    let mut text = format!("echo 'processing: {}' \n", label);
    text.push_str("align_image_stack -m -a OUT ");
    for image in images {
        text.push_str(image);
        text.push(' ');
    }
    text.push_str(" \n");
    text.push_str(&format!(
        "enfuse --exposure-weight=0 --saturation-weight=0 --contrast-weight=1 --hard-mask --output={}.tif OUT*.tif \n",
        output
    ));
    text.push_str("rm OUT*.tif \n");
    text
}

/// An open stack-merge script.
///
/// Blocks are written as each series completes, so an interrupted run leaves a
/// script covering every finished sample. [`StackScript::close`] must be
/// awaited to flush the file.
pub struct StackScript {
    path: PathBuf,
    file: File,
    series: usize,
}

impl StackScript {
    /// Create (or truncate) the script at `path` and write the header.
    pub async fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path).await?;
        file.write_all(SCRIPT_HEADER.as_bytes()).await?;
        tracing::debug!(path = %path.display(), "stack script opened");
        Ok(Self {
            path,
            file,
            series: 0,
        })
    }

    /// Append the block for one captured series.
    pub async fn append_series(
        &mut self,
        label: &str,
        images: &[String],
        output: &str,
    ) -> std::io::Result<()> {
        self.file
            .write_all(series_block(label, images, output).as_bytes())
            .await?;
        self.series += 1;
        Ok(())
    }

    /// Series written so far.
    pub fn series(&self) -> usize {
        self.series
    }

    /// Script location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the script, returning its path.
    pub async fn close(mut self) -> std::io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        tracing::debug!(path = %self.path.display(), series = self.series, "stack script closed");
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_text_is_exact() {
        let images = vec!["rawimages/B4a_0.jpg".to_string(), "rawimages/B4a_1.jpg".to_string()];
        assert_eq!(
            series_block("B4a", &images, "B4a"),
            "echo 'processing: B4a' \n\
             align_image_stack -m -a OUT rawimages/B4a_0.jpg rawimages/B4a_1.jpg  \n\
             enfuse --exposure-weight=0 --saturation-weight=0 --contrast-weight=1 --hard-mask --output=B4a.tif OUT*.tif \n\
             rm OUT*.tif \n"
        );
    }

    #[tokio::test]
    async fn script_has_one_header_and_a_block_per_series() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = StackScript::create(dir.path().join("processplate.com"))
            .await
            .unwrap();
        script
            .append_series("A1", &["rawimages/A1_0.jpg".to_string()], "A1")
            .await
            .unwrap();
        script
            .append_series("A2", &["rawimages/A2_0.jpg".to_string()], "A2")
            .await
            .unwrap();
        assert_eq!(script.series(), 2);
        let path = script.close().await.unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with(SCRIPT_HEADER));
        assert_eq!(text.matches("rm OUT*.tif \n").count(), 3);
        assert_eq!(text.matches("align_image_stack").count(), 2);
    }
}
