// SPDX-License-Identifier: MIT OR Apache-2.0
//! Image file nodes backed by the `image` crate.
//!
//! Samples are interleaved floats. Reading keeps the file's channel count
//! (1 to 4) and maps integer formats to `0..=1`. Writing clamps to `0..=1`
//! and quantises to 8 bits per channel. IO problems become error annotations
//! and leave the outputs alone.

use image::{DynamicImage, ExtendedColorType, GenericImageView};
use patchwork_graph::{InitContext, InitContextExt, Node, PortId, Result, RunContext, RunContextExt};

/// `readimg-f`: loads an image file
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadImage;

impl ReadImage {
    /// Project-format name
    pub const NAME: &'static str = "readimg-f";
    /// File path
    pub const PATH: PortId = PortId(0);
    /// Width in pixels
    pub const WIDTH: PortId = PortId(0);
    /// Height in pixels
    pub const HEIGHT: PortId = PortId(1);
    /// Channels per pixel
    pub const CHANNELS: PortId = PortId(2);
    /// Interleaved samples
    pub const BUFFER: PortId = PortId(3);
}

impl Node for ReadImage {
    fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
        ctx.set_name(Self::NAME)?;
        ctx.input(Self::PATH, String::new(), "path")?;
        ctx.output::<i32>(Self::WIDTH, "width")?;
        ctx.output::<i32>(Self::HEIGHT, "height")?;
        ctx.output::<i32>(Self::CHANNELS, "channels")?;
        ctx.output::<Vec<f32>>(Self::BUFFER, "buffer")
    }

    fn run(&mut self, ctx: &mut dyn RunContext<'_>) -> Result<()> {
        let path = ctx.read::<String>(Self::PATH)?;
        let image = match image::open(path) {
            Ok(image) => image,
            Err(err) => {
                ctx.error(&format!("can't open image file {path}: {err}"));
                return Ok(());
            }
        };

        let (width, height) = image.dimensions();
        let (Ok(width), Ok(height)) = (i32::try_from(width), i32::try_from(height)) else {
            ctx.error(&format!("image {path} is too large"));
            return Ok(());
        };
        let (channels, samples) = samples(&image);

        *ctx.write::<i32>(Self::WIDTH)? = width;
        *ctx.write::<i32>(Self::HEIGHT)? = height;
        *ctx.write::<i32>(Self::CHANNELS)? = channels;
        *ctx.write::<Vec<f32>>(Self::BUFFER)? = samples;
        tracing::debug!("read {path}: {width}x{height}x{channels}");
        Ok(())
    }
}

fn samples(image: &DynamicImage) -> (i32, Vec<f32>) {
    match image.color().channel_count() {
        1 => (1, image.to_luma32f().into_raw()),
        2 => (2, image.to_luma_alpha32f().into_raw()),
        3 => (3, image.to_rgb32f().into_raw()),
        _ => (4, image.to_rgba32f().into_raw()),
    }
}

/// `writeimg-f`: saves a buffer as an image file; the format follows the
/// path's extension
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteImage;

impl WriteImage {
    /// Project-format name
    pub const NAME: &'static str = "writeimg-f";
    /// File path
    pub const PATH: PortId = PortId(0);
    /// Width in pixels
    pub const WIDTH: PortId = PortId(1);
    /// Height in pixels
    pub const HEIGHT: PortId = PortId(2);
    /// Channels per pixel, 1 to 4
    pub const CHANNELS: PortId = PortId(3);
    /// Interleaved samples
    pub const BUFFER: PortId = PortId(4);
}

impl Node for WriteImage {
    fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
        ctx.set_name(Self::NAME)?;
        ctx.input(Self::PATH, String::new(), "path")?;
        ctx.input(Self::WIDTH, 0i32, "width")?;
        ctx.input(Self::HEIGHT, 0i32, "height")?;
        ctx.input(Self::CHANNELS, 0i32, "channels")?;
        ctx.input(Self::BUFFER, Vec::<f32>::new(), "buffer")
    }

    fn run(&mut self, ctx: &mut dyn RunContext<'_>) -> Result<()> {
        let path = ctx.read::<String>(Self::PATH)?;
        let width = *ctx.read::<i32>(Self::WIDTH)?;
        let height = *ctx.read::<i32>(Self::HEIGHT)?;
        let channels = *ctx.read::<i32>(Self::CHANNELS)?;
        let data = ctx.read::<Vec<f32>>(Self::BUFFER)?;

        let color = match channels {
            1 => ExtendedColorType::L8,
            2 => ExtendedColorType::La8,
            3 => ExtendedColorType::Rgb8,
            4 => ExtendedColorType::Rgba8,
            _ => {
                ctx.error(&format!("can't write {channels} channels, expected 1 to 4"));
                return Ok(());
            }
        };
        let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
            ctx.error("W & H can't be negative");
            return Ok(());
        };
        let expected = (w as usize)
            .saturating_mul(h as usize)
            .saturating_mul(channels as usize);
        if expected == 0 || expected != data.len() {
            ctx.error(&format!(
                "buffer holds {} values but a {width}x{height}x{channels} image needs {expected}",
                data.len()
            ));
            return Ok(());
        }

        let bytes: Vec<u8> = data
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        if let Err(err) = image::save_buffer(path, &bytes, w, h, color) {
            ctx.error(&format!("can't write image file {path}: {err}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchwork_graph::{Graph, Severity};

    #[test]
    fn test_missing_file_is_an_annotation() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(ReadImage)).unwrap();
        graph.set_input(node, ReadImage::PATH, "/nonexistent/picture.png").unwrap();
        graph.run(node).unwrap();

        let annotations = graph.annotations(node).unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].severity, Severity::Error);
        assert_eq!(*graph.output::<i32>(node, ReadImage::WIDTH).unwrap(), 0);
    }

    #[test]
    fn test_write_checks_dimensions() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(WriteImage)).unwrap();
        graph.set_input(node, WriteImage::WIDTH, 2).unwrap();
        graph.set_input(node, WriteImage::HEIGHT, 2).unwrap();
        graph.set_input(node, WriteImage::CHANNELS, 1).unwrap();
        graph.set_input(node, WriteImage::BUFFER, vec![0.0; 3]).unwrap();
        graph.run(node).unwrap();
        assert!(graph.annotations(node).unwrap()[0].message.contains("needs 4"));

        graph.set_input(node, WriteImage::CHANNELS, 5).unwrap();
        graph.run(node).unwrap();
        assert!(graph.annotations(node).unwrap()[0].message.contains("5 channels"));
    }
}
