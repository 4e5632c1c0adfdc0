//! Overlay sinks standing in for the on-screen renderer. Each one maps the
//! batch into view pixels with `map_batch` and presents it its own way.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use serde::Serialize;
use sightline_vision::mapper::{map_batch, OverlayBox};
use sightline_vision::{BoundingBox, DetectionBatchOutput};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OverlayConfig {
    pub sink: String, // "log" | "jsonl" | "snapshot"
    #[serde(default = "default_view_width")]
    pub view_width: u32,
    #[serde(default = "default_view_height")]
    pub view_height: u32,
    pub path: Option<PathBuf>,
}

fn default_view_width() -> u32 {
    1080
}

fn default_view_height() -> u32 {
    1920
}

impl OverlayConfig {
    pub fn check(&self) -> Result<()> {
        anyhow::ensure!(
            self.view_width > 0 && self.view_height > 0,
            "overlay.view_width/view_height must be positive"
        );
        match self.sink.as_str() {
            "log" => {}
            "jsonl" | "snapshot" => {
                let path = self.path.as_ref().context("overlay.path missing")?;
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    anyhow::ensure!(parent.is_dir(), "overlay.path parent is not a dir: {}", parent.display());
                }
            }
            other => anyhow::bail!("unknown overlay.sink: {}", other),
        }
        Ok(())
    }
}

enum Target {
    Log,
    Jsonl(tokio::fs::File),
    Snapshot(PathBuf),
}

pub struct Overlay {
    target: Target,
    view_width: u32,
    view_height: u32,
}

#[derive(Serialize)]
struct Record<'a> {
    ts_unix_ms: i64,
    sequence: u64,
    source_width: u32,
    source_height: u32,
    latency_ms: u64,
    boxes: &'a [OverlayBox],
}

impl Overlay {
    pub async fn open(cfg: &OverlayConfig) -> Result<Self> {
        cfg.check()?;
        let target = match cfg.sink.as_str() {
            "log" => Target::Log,
            "jsonl" => {
                let path = cfg.path.as_ref().context("overlay.path missing")?;
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .with_context(|| format!("open overlay log {}", path.display()))?;
                Target::Jsonl(file)
            }
            "snapshot" => Target::Snapshot(cfg.path.clone().context("overlay.path missing")?),
            other => anyhow::bail!("unknown overlay.sink: {}", other),
        };
        info!("overlay: {} sink, view {}x{}", cfg.sink, cfg.view_width, cfg.view_height);
        Ok(Self {
            target,
            view_width: cfg.view_width,
            view_height: cfg.view_height,
        })
    }

    pub async fn draw(&mut self, batch: &DetectionBatchOutput) -> Result<()> {
        let boxes = map_batch(batch, self.view_width, self.view_height);
        match &mut self.target {
            Target::Log => {
                if boxes.is_empty() {
                    debug!("overlay: frame {} clear", batch.sequence);
                }
                for b in &boxes {
                    info!(
                        "overlay: frame {} {} at ({:.1}, {:.1})-({:.1}, {:.1})",
                        batch.sequence,
                        b.caption,
                        b.rect.left(),
                        b.rect.top(),
                        b.rect.right(),
                        b.rect.bottom()
                    );
                }
            }
            Target::Jsonl(file) => {
                let record = Record {
                    ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
                    sequence: batch.sequence,
                    source_width: batch.source_width,
                    source_height: batch.source_height,
                    latency_ms: batch.latency.as_millis() as u64,
                    boxes: &boxes,
                };
                let mut line = serde_json::to_vec(&record).context("encode overlay record")?;
                line.push(b'\n');
                file.write_all(&line).await.context("write overlay record")?;
                file.flush().await.context("flush overlay log")?;
            }
            Target::Snapshot(path) => {
                let (w, h) = (self.view_width, self.view_height);
                let path = path.clone();
                tokio::task::spawn_blocking(move || save_snapshot(&render(&boxes, w, h), &path))
                    .await
                    .context("snapshot task")??;
            }
        }
        Ok(())
    }
}

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);

fn render(boxes: &[OverlayBox], width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::new(width, height);
    for b in boxes {
        outline(&mut img, &b.rect, OUTLINE);
    }
    img
}

/// One-pixel box outline, clipped to the image.
fn outline(img: &mut RgbImage, rect: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clip = |v: f32, max: u32| (v.max(0.0) as u32).min(max - 1);
    let (x0, x1) = (clip(rect.left(), w), clip(rect.right(), w));
    let (y0, y1) = (clip(rect.top(), h), clip(rect.bottom(), h));
    for x in x0..=x1 {
        img.put_pixel(x, y0, color);
        img.put_pixel(x, y1, color);
    }
    for y in y0..=y1 {
        img.put_pixel(x0, y, color);
        img.put_pixel(x1, y, color);
    }
}

// Written beside the target, then renamed over it.
fn save_snapshot(img: &RgbImage, path: &Path) -> Result<()> {
    let tmp = path.with_extension("png.tmp");
    img.save_with_format(&tmp, image::ImageFormat::Png)
        .with_context(|| format!("write snapshot {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replace snapshot {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_vision::DetectionResult;
    use std::time::Duration;

    fn batch() -> DetectionBatchOutput {
        DetectionBatchOutput {
            sequence: 7,
            source_width: 320,
            source_height: 320,
            detections: vec![DetectionResult::new(
                BoundingBox::from_corners(10.0, 20.0, 100.0, 200.0),
                "person",
                0.88,
            )
            .unwrap()],
            latency: Duration::from_millis(12),
        }
    }

    fn cfg(sink: &str, path: Option<PathBuf>) -> OverlayConfig {
        OverlayConfig {
            sink: sink.into(),
            view_width: 1080,
            view_height: 1920,
            path,
        }
    }

    #[tokio::test]
    async fn jsonl_sink_appends_one_record_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.jsonl");
        let mut overlay = Overlay::open(&cfg("jsonl", Some(path.clone()))).await.unwrap();
        overlay.draw(&batch()).await.unwrap();
        overlay.draw(&batch()).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["sequence"], 7);
        assert_eq!(record["latency_ms"], 12);
        assert_eq!(record["boxes"][0]["caption"], "person (0.88)");
        assert_eq!(record["boxes"][0]["rect"]["left"], 33.75);
        assert_eq!(record["boxes"][0]["rect"]["bottom"], 1200.0);
    }

    #[tokio::test]
    async fn snapshot_sink_outlines_the_mapped_box() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.png");
        let mut overlay = Overlay::open(&cfg("snapshot", Some(path.clone()))).await.unwrap();
        overlay.draw(&batch()).await.unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (1080, 1920));
        assert_eq!(*img.get_pixel(33, 120), OUTLINE);
        assert_eq!(*img.get_pixel(200, 600), Rgb([0, 0, 0]));
    }

    #[test]
    fn file_sinks_need_a_path() {
        assert!(cfg("jsonl", None).check().is_err());
        assert!(cfg("hud", None).check().is_err());
        assert!(cfg("log", None).check().is_ok());
    }
}
