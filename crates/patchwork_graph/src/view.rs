// SPDX-License-Identifier: MIT OR Apache-2.0
//! Read-only graph rendering.
//!
//! The view draws node positions, names, ports, connections, run annotations
//! and raster previews. It only owns its own pan/zoom state and never mutates
//! the graph.

use crate::graph::Graph;
use crate::node::{Canvas, NodeHandle, Severity};
use crate::port::{DataType, PortId, PortInfo};
use crate::spec::NodeSpec;
use egui::epaint::CubicBezierShape;
use egui::{Align2, Color32, FontId, Pos2, Rect, Rounding, Stroke, Vec2};
use std::collections::HashMap;

const BODY_WIDTH: f32 = 168.0;
const TITLE_HEIGHT: f32 = 22.0;
const ROW_HEIGHT: f32 = 20.0;
const BODY_PADDING: f32 = 6.0;
const PIN_RADIUS: f32 = 5.0;
const CORNER: f32 = 4.0;

const THUMBNAIL_EDGE: f32 = 80.0;
/// Upper bound on thumbnail cells per edge
const THUMBNAIL_CELLS: usize = 32;

const GRID_STEP: f32 = 24.0;
const MIN_SCALE: f32 = 0.25;
const MAX_SCALE: f32 = 3.0;

/// Pan/zoom state of a graph view.
///
/// Graph coordinates map to screen as `rect.min + offset + p * scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphView {
    /// Screen-space offset of the graph origin from the view's top-left corner
    pub offset: Vec2,
    /// Screen pixels per graph unit
    pub scale: f32,
    /// Draw the background grid
    pub grid: bool,
    /// Draw raster previews under the nodes that produced one
    pub previews: bool,
}

impl Default for GraphView {
    fn default() -> Self {
        Self {
            offset: Vec2::splat(40.0),
            scale: 1.0,
            grid: true,
            previews: true,
        }
    }
}

impl GraphView {
    /// Screen position of a graph-space point
    pub fn to_screen(&self, rect: Rect, point: Pos2) -> Pos2 {
        rect.min + self.offset + point.to_vec2() * self.scale
    }

    /// Graph-space point under a screen position
    pub fn to_graph(&self, rect: Rect, screen: Pos2) -> Pos2 {
        ((screen - rect.min - self.offset) / self.scale).to_pos2()
    }

    /// Change the scale while keeping the graph point under `anchor` in place
    pub fn zoom_at(&mut self, rect: Rect, anchor: Pos2, factor: f32) {
        let fixed = self.to_graph(rect, anchor);
        self.scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        self.offset = anchor - rect.min - fixed.to_vec2() * self.scale;
    }

    /// Render `graph` into the remaining space of `ui`
    pub fn ui(&mut self, ui: &mut egui::Ui, graph: &Graph) {
        let rect = ui.available_rect_before_wrap();
        let response = ui.allocate_rect(rect, egui::Sense::drag());
        if response.dragged() {
            self.offset += response.drag_delta();
        }
        if response.hovered() {
            let (scroll, zoom, pointer) = ui.input(|i| (i.smooth_scroll_delta, i.zoom_delta(), i.pointer.hover_pos()));
            self.offset += scroll;
            if zoom != 1.0 {
                self.zoom_at(rect, pointer.unwrap_or(rect.center()), zoom);
            }
        }

        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, Rounding::ZERO, Color32::from_gray(24));
        if self.grid {
            self.paint_grid(&painter, rect);
        }

        let layouts: HashMap<NodeHandle, NodeLayout> =
            graph.nodes().map(|spec| (spec.handle(), NodeLayout::of(spec))).collect();
        self.paint_wires(&painter, rect, graph, &layouts);
        for spec in graph.nodes() {
            if let Some(layout) = layouts.get(&spec.handle()) {
                self.paint_node(&painter, rect, spec, layout);
            }
        }

        let wires = graph.connections().map(|c| c.len()).unwrap_or(0);
        painter.text(
            rect.left_bottom() + Vec2::new(6.0, -6.0),
            Align2::LEFT_BOTTOM,
            format!("{} nodes, {wires} wires, {:.0}%", graph.node_count(), self.scale * 100.0),
            FontId::monospace(11.0),
            Color32::from_gray(140),
        );
    }

    fn paint_grid(&self, painter: &egui::Painter, rect: Rect) {
        let stroke = Stroke::new(1.0, Color32::from_gray(36));
        let step = GRID_STEP * self.scale;
        for x in grid_lines(rect.left(), rect.right(), rect.left() + self.offset.x, step) {
            painter.vline(x, rect.y_range(), stroke);
        }
        for y in grid_lines(rect.top(), rect.bottom(), rect.top() + self.offset.y, step) {
            painter.hline(rect.x_range(), y, stroke);
        }
    }

    fn paint_wires(&self, painter: &egui::Painter, rect: Rect, graph: &Graph, layouts: &HashMap<NodeHandle, NodeLayout>) {
        let Ok(connections) = graph.connections() else {
            return;
        };
        for connection in connections {
            let from = layouts.get(&connection.from_node).and_then(|l| l.output(connection.from_port));
            let to = layouts.get(&connection.to_node).and_then(|l| l.input(connection.to_port));
            let (Some((start, data_type)), Some((end, _))) = (from, to) else {
                continue;
            };
            let points = wire_controls(self.to_screen(rect, start), self.to_screen(rect, end));
            let stroke = Stroke::new(2.0 * self.scale, pin_color(data_type));
            painter.add(CubicBezierShape::from_points_stroke(points, false, Color32::TRANSPARENT, stroke));
        }
    }

    fn paint_node(&self, painter: &egui::Painter, rect: Rect, spec: &NodeSpec, layout: &NodeLayout) {
        let body = Rect::from_min_max(self.to_screen(rect, layout.frame.min), self.to_screen(rect, layout.frame.max));
        if !body.intersects(rect) {
            return;
        }
        let corner = CORNER * self.scale;
        painter.rect(body, corner, Color32::from_gray(48), Stroke::new(1.0, Color32::from_gray(70)));

        let title = Rect::from_min_size(body.min, Vec2::new(body.width(), TITLE_HEIGHT * self.scale));
        let title_rounding = Rounding {
            nw: corner,
            ne: corner,
            ..Rounding::ZERO
        };
        painter.rect_filled(title, title_rounding, title_color(spec.annotations().iter().map(|a| a.severity)));
        painter.text(
            title.left_center() + Vec2::new(BODY_PADDING * self.scale, 0.0),
            Align2::LEFT_CENTER,
            format!("{}  [{}]", spec.name(), spec.handle()),
            FontId::proportional(12.0 * self.scale),
            Color32::WHITE,
        );

        let label = FontId::proportional(10.0 * self.scale);
        for (pin, port) in layout.inputs.iter().zip(spec.inputs()) {
            let center = self.to_screen(rect, pin.at);
            self.paint_pin(painter, center, pin.data_type, port.connected);
            painter.text(
                center + Vec2::new(2.0 * PIN_RADIUS * self.scale, 0.0),
                Align2::LEFT_CENTER,
                &port.title,
                label.clone(),
                Color32::from_gray(210),
            );
        }
        for (pin, port) in layout.outputs.iter().zip(spec.outputs()) {
            let center = self.to_screen(rect, pin.at);
            self.paint_pin(painter, center, pin.data_type, true);
            painter.text(
                center - Vec2::new(2.0 * PIN_RADIUS * self.scale, 0.0),
                Align2::RIGHT_CENTER,
                &port.title,
                label.clone(),
                Color32::from_gray(210),
            );
        }

        let mut below = body.left_bottom() + Vec2::new(0.0, 4.0 * self.scale);
        for annotation in spec.annotations() {
            let color = match annotation.severity {
                Severity::Warning => Color32::from_rgb(225, 185, 70),
                Severity::Error => Color32::from_rgb(235, 90, 90),
            };
            let drawn = painter.text(below, Align2::LEFT_TOP, &annotation.message, label.clone(), color);
            below.y = drawn.bottom() + 2.0 * self.scale;
        }

        if self.previews {
            if let Some(thumbnail) = spec.preview().and_then(Thumbnail::of) {
                self.paint_thumbnail(painter, below, &thumbnail);
            }
        }
    }

    fn paint_pin(&self, painter: &egui::Painter, center: Pos2, data_type: DataType, bound: bool) {
        let radius = PIN_RADIUS * self.scale;
        let color = pin_color(data_type);
        if bound {
            painter.circle_filled(center, radius, color);
        } else {
            painter.circle_stroke(center, radius, Stroke::new(1.5, color));
        }
    }

    fn paint_thumbnail(&self, painter: &egui::Painter, top_left: Pos2, thumbnail: &Thumbnail) {
        let edge = THUMBNAIL_EDGE * self.scale;
        let cell = Vec2::new(edge / thumbnail.columns as f32, edge / thumbnail.rows as f32);
        for (index, &level) in thumbnail.levels.iter().enumerate() {
            let (row, column) = (index / thumbnail.columns, index % thumbnail.columns);
            let min = top_left + Vec2::new(column as f32 * cell.x, row as f32 * cell.y);
            painter.rect_filled(Rect::from_min_size(min, cell), Rounding::ZERO, Color32::from_gray(level));
        }
    }
}

/// A port's pin in graph space
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pin {
    id: PortId,
    data_type: DataType,
    at: Pos2,
}

/// Graph-space geometry of one node
#[derive(Debug, Clone, PartialEq)]
struct NodeLayout {
    frame: Rect,
    inputs: Vec<Pin>,
    outputs: Vec<Pin>,
}

impl NodeLayout {
    fn of(spec: &NodeSpec) -> Self {
        let position = spec.position();
        let origin = Pos2::new(position.x as f32, position.y as f32);
        let pins = |ports: Vec<PortInfo>, x: f32| -> Vec<Pin> {
            ports
                .into_iter()
                .enumerate()
                .map(|(row, port)| Pin {
                    id: port.id,
                    data_type: port.data_type,
                    at: origin + Vec2::new(x, TITLE_HEIGHT + (row as f32 + 0.5) * ROW_HEIGHT),
                })
                .collect()
        };
        let inputs = pins(spec.inputs(), 0.0);
        let outputs = pins(spec.outputs(), BODY_WIDTH);
        let rows = inputs.len().max(outputs.len()) as f32;
        Self {
            frame: Rect::from_min_size(origin, Vec2::new(BODY_WIDTH, TITLE_HEIGHT + rows * ROW_HEIGHT + BODY_PADDING)),
            inputs,
            outputs,
        }
    }

    fn input(&self, id: PortId) -> Option<(Pos2, DataType)> {
        self.inputs.iter().find(|pin| pin.id == id).map(|pin| (pin.at, pin.data_type))
    }

    fn output(&self, id: PortId) -> Option<(Pos2, DataType)> {
        self.outputs.iter().find(|pin| pin.id == id).map(|pin| (pin.at, pin.data_type))
    }
}

/// Gray-level downsample of a [`Canvas`], row-major
#[derive(Debug, Clone, PartialEq)]
struct Thumbnail {
    columns: usize,
    rows: usize,
    levels: Vec<u8>,
}

impl Thumbnail {
    /// Samples are clamped to `0..=1`; samples past the end of the data read
    /// as black. `None` for an empty canvas.
    fn of(canvas: &Canvas) -> Option<Self> {
        if canvas.width == 0 || canvas.height == 0 {
            return None;
        }
        let columns = canvas.width.min(THUMBNAIL_CELLS);
        let rows = canvas.height.min(THUMBNAIL_CELLS);
        let mut levels = Vec::with_capacity(columns * rows);
        for row in 0..rows {
            let y = row * canvas.height / rows;
            for column in 0..columns {
                let x = column * canvas.width / columns;
                let sample = canvas.data.get(y * canvas.width + x).copied().unwrap_or(0.0);
                levels.push((sample.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }
        Some(Self { columns, rows, levels })
    }
}

/// Positions of grid lines in `[from, to)` that fall on `phase + k * step`
fn grid_lines(from: f32, to: f32, phase: f32, step: f32) -> Vec<f32> {
    if step < 2.0 {
        return Vec::new();
    }
    let first = from + (phase - from).rem_euclid(step);
    std::iter::successors(Some(first), |x| Some(x + step))
        .take_while(|&x| x < to)
        .collect()
}

/// Control points of a wire leaving `start` rightwards and entering `end` from the left
fn wire_controls(start: Pos2, end: Pos2) -> [Pos2; 4] {
    let pull = ((end.x - start.x).abs() * 0.5).max(30.0);
    [start, start + Vec2::new(pull, 0.0), end - Vec2::new(pull, 0.0), end]
}

fn pin_color(data_type: DataType) -> Color32 {
    let [r, g, b] = data_type.color();
    Color32::from_rgb(r, g, b)
}

fn title_color(severities: impl Iterator<Item = Severity>) -> Color32 {
    let mut color = Color32::from_rgb(60, 90, 125);
    for severity in severities {
        match severity {
            Severity::Error => return Color32::from_rgb(135, 45, 45),
            Severity::Warning => color = Color32::from_rgb(125, 105, 35),
        }
    }
    color
}
