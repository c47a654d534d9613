//! CPU tessellation of draw commands into instanced quads.
//!
//! Every command becomes one or more [`ShapeInstanceGpu`] in target pixel
//! space; the fragment shader evaluates coverage per kind. Blits break the
//! instance stream into batches so draw order is preserved across the two
//! pipelines.

use std::ops::Range;

use model::PointF;
use render_protocol::{Affine, Color, DrawCommand, RectF, TargetId, flatten_cubic};

const BEZIER_SEGMENTS: usize = 24;
/// Hard cap on dots generated for one grid command.
const MAX_GRID_DOTS: usize = 1 << 16;
const TEXT_ADVANCE: f32 = 0.6;
const DIGIT_WIDTH: f32 = 0.45;
const SEGMENT_THICKNESS: f32 = 0.12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ShapeKind {
    Fill = 0,
    Stroke = 1,
    Segment = 2,
    Circle = 3,
    Shadow = 4,
    Blit = 5,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShapeInstanceGpu {
    /// Quad covered in target pixels: x, y, width, height.
    pub rect: [f32; 4],
    pub color: [f32; 4],
    /// Exact shape: a rectangle, segment endpoints, circle centre and radius,
    /// or source UVs for blits.
    pub geometry: [f32; 4],
    /// Kind, corner radius, stroke width, shadow softness.
    pub params: [f32; 4],
}

impl ShapeInstanceGpu {
    fn new(kind: ShapeKind, quad: RectF, color: Color, geometry: [f32; 4]) -> Self {
        Self {
            rect: [quad.x, quad.y, quad.width, quad.height],
            color: color.to_array(),
            geometry,
            params: [kind as u32 as f32, 0.0, 0.0, 0.0],
        }
    }

    pub fn kind(&self) -> u32 {
        self.params[0] as u32
    }

    pub fn quad(&self) -> RectF {
        RectF::new(self.rect[0], self.rect[1], self.rect[2], self.rect[3])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    Shapes(Range<u32>),
    Blit { source: TargetId, instance: u32 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tessellation {
    pub instances: Vec<ShapeInstanceGpu>,
    pub batches: Vec<Batch>,
}

impl Tessellation {
    fn push(&mut self, instance: ShapeInstanceGpu) {
        let index = self.instances.len() as u32;
        self.instances.push(instance);
        match self.batches.last_mut() {
            Some(Batch::Shapes(range)) if range.end == index => range.end += 1,
            _ => self.batches.push(Batch::Shapes(index..index + 1)),
        }
    }

    fn push_blit(&mut self, source: TargetId, instance: ShapeInstanceGpu) {
        let index = self.instances.len() as u32;
        self.instances.push(instance);
        self.batches.push(Batch::Blit {
            source,
            instance: index,
        });
    }
}

fn rect_to_array(rect: RectF) -> [f32; 4] {
    [rect.x, rect.y, rect.width, rect.height]
}

fn intersects(first: RectF, second: RectF) -> bool {
    first.x < second.right()
        && second.x < first.right()
        && first.y < second.bottom()
        && second.y < first.bottom()
}

/// Tessellates `commands` drawn through `transform` into target pixels.
///
/// Commands entirely outside `clip` are dropped. `source_size` resolves the
/// pixel size of blit sources; blits of unknown sources are skipped.
pub fn tessellate(
    commands: &[DrawCommand],
    transform: Affine,
    clip: Option<RectF>,
    source_size: impl Fn(TargetId) -> Option<(u32, u32)>,
) -> Tessellation {
    let mut out = Tessellation::default();
    let scale = transform.scale;
    for command in commands {
        let device_bounds = transform.apply_rect(command.bounds()).expanded(1.0);
        if let Some(clip) = clip
            && !intersects(device_bounds, clip)
        {
            continue;
        }
        match command {
            DrawCommand::FillRect {
                rect,
                color,
                corner_radius,
            } => {
                let rect = transform.apply_rect(*rect);
                let mut instance = ShapeInstanceGpu::new(
                    ShapeKind::Fill,
                    rect.expanded(1.0),
                    *color,
                    rect_to_array(rect),
                );
                instance.params[1] = corner_radius * scale;
                out.push(instance);
            }
            DrawCommand::StrokeRect {
                rect,
                color,
                width,
                corner_radius,
            } => {
                let rect = transform.apply_rect(*rect);
                let width = (width * scale).max(1.0);
                let mut instance = ShapeInstanceGpu::new(
                    ShapeKind::Stroke,
                    rect.expanded(width / 2.0 + 1.0),
                    *color,
                    rect_to_array(rect),
                );
                instance.params[1] = corner_radius * scale;
                instance.params[2] = width;
                out.push(instance);
            }
            DrawCommand::Line {
                from,
                to,
                color,
                width,
            } => push_segment(
                &mut out,
                transform.apply(*from),
                transform.apply(*to),
                *color,
                (width * scale).max(1.0),
            ),
            DrawCommand::FillCircle {
                centre,
                radius,
                color,
            } => push_circle(&mut out, transform.apply(*centre), radius * scale, *color),
            DrawCommand::DotGrid {
                area,
                spacing,
                dot_size,
                color,
                major,
            } => {
                let visible = match clip {
                    Some(clip) => intersection(*area, inverse_rect(transform, clip)),
                    None => Some(*area),
                };
                let Some(visible) = visible else {
                    continue;
                };
                let dots = grid_points(visible, *spacing);
                let radius = (dot_size * scale / 2.0).max(0.5);
                for (column, row, point) in dots {
                    let dot_color = match major {
                        Some(major)
                            if major.every > 0
                                && column.rem_euclid(major.every as i64) == 0
                                && row.rem_euclid(major.every as i64) == 0 =>
                        {
                            major.color
                        }
                        _ => *color,
                    };
                    push_circle(&mut out, transform.apply(point), radius, dot_color);
                }
            }
            DrawCommand::Bezier {
                from,
                control_a,
                control_b,
                to,
                color,
                width,
            } => {
                let points = flatten_cubic(*from, *control_a, *control_b, *to, BEZIER_SEGMENTS);
                let width = (width * scale).max(1.0);
                for segment in points.windows(2) {
                    push_segment(
                        &mut out,
                        transform.apply(segment[0]),
                        transform.apply(segment[1]),
                        *color,
                        width,
                    );
                }
            }
            DrawCommand::Shadow {
                rect,
                radius,
                color,
            } => {
                let rect = transform.apply_rect(*rect);
                let radius = radius * scale;
                let mut instance = ShapeInstanceGpu::new(
                    ShapeKind::Shadow,
                    rect.expanded(radius),
                    *color,
                    rect_to_array(rect),
                );
                instance.params[3] = radius;
                out.push(instance);
            }
            DrawCommand::Blit {
                source,
                source_rect,
                dest,
            } => {
                let Some((width, height)) = source_size(*source) else {
                    tracing::debug!(?source, "skipping blit of unknown target");
                    continue;
                };
                let (width, height) = (width as f32, height as f32);
                let uv = match source_rect {
                    Some(rect) => [
                        rect.x / width,
                        rect.y / height,
                        rect.right() / width,
                        rect.bottom() / height,
                    ],
                    None => [0.0, 0.0, 1.0, 1.0],
                };
                let dest = transform.apply_rect(*dest);
                out.push_blit(
                    *source,
                    ShapeInstanceGpu::new(ShapeKind::Blit, dest, Color::WHITE, uv),
                );
            }
            DrawCommand::Text {
                origin,
                text,
                size,
                color,
            } => push_text(&mut out, transform.apply(*origin), text, size * scale, *color),
        }
    }
    out
}

fn push_segment(out: &mut Tessellation, from: PointF, to: PointF, color: Color, width: f32) {
    let quad = RectF::from_points(from, to).expanded(width / 2.0 + 1.0);
    let mut instance =
        ShapeInstanceGpu::new(ShapeKind::Segment, quad, color, [from.x, from.y, to.x, to.y]);
    instance.params[2] = width;
    out.push(instance);
}

fn push_circle(out: &mut Tessellation, centre: PointF, radius: f32, color: Color) {
    let quad = RectF::new(
        centre.x - radius - 1.0,
        centre.y - radius - 1.0,
        radius * 2.0 + 2.0,
        radius * 2.0 + 2.0,
    );
    out.push(ShapeInstanceGpu::new(
        ShapeKind::Circle,
        quad,
        color,
        [centre.x, centre.y, radius, 0.0],
    ));
}

fn intersection(first: RectF, second: RectF) -> Option<RectF> {
    let x = first.x.max(second.x);
    let y = first.y.max(second.y);
    let right = first.right().min(second.right());
    let bottom = first.bottom().min(second.bottom());
    (right > x && bottom > y).then(|| RectF::new(x, y, right - x, bottom - y))
}

fn inverse_rect(transform: Affine, rect: RectF) -> RectF {
    if transform.scale.abs() <= f32::EPSILON {
        return RectF::new(0.0, 0.0, 0.0, 0.0);
    }
    RectF::new(
        (rect.x - transform.translate_x) / transform.scale,
        (rect.y - transform.translate_y) / transform.scale,
        rect.width / transform.scale,
        rect.height / transform.scale,
    )
}

/// Grid intersections inside `area` with their column and row numbers.
fn grid_points(area: RectF, spacing: f32) -> Vec<(i64, i64, PointF)> {
    if spacing <= 0.0 {
        return Vec::new();
    }
    let first_column = (area.x / spacing).ceil() as i64;
    let last_column = (area.right() / spacing).floor() as i64;
    let first_row = (area.y / spacing).ceil() as i64;
    let last_row = (area.bottom() / spacing).floor() as i64;
    let columns = (last_column - first_column + 1).max(0) as usize;
    let rows = (last_row - first_row + 1).max(0) as usize;
    if columns.saturating_mul(rows) > MAX_GRID_DOTS {
        tracing::warn!(columns, rows, "dot grid too dense, skipped");
        return Vec::new();
    }
    let mut points = Vec::with_capacity(columns * rows);
    for row in first_row..=last_row {
        for column in first_column..=last_column {
            points.push((
                column,
                row,
                PointF::new(column as f32 * spacing, row as f32 * spacing),
            ));
        }
    }
    points
}

/// Seven-segment bits (a..g) of each decimal digit.
const DIGIT_SEGMENTS: [u8; 10] = [
    0b0111111, 0b0000110, 0b1011011, 0b1001111, 0b1100110, 0b1101101, 0b1111101, 0b0000111,
    0b1111111, 0b1101111,
];

/// Digits are drawn as seven-segment glyphs; other characters are greeked
/// into blocks, which is all the canvas chrome needs.
fn push_text(out: &mut Tessellation, origin: PointF, text: &str, size: f32, color: Color) {
    let advance = size * TEXT_ADVANCE;
    let thickness = (size * SEGMENT_THICKNESS).max(1.0);
    for (index, character) in text.chars().enumerate() {
        let left = origin.x + index as f32 * advance;
        let top = origin.y;
        match character {
            ' ' => {}
            '0'..='9' => {
                let bits = DIGIT_SEGMENTS[character as usize - '0' as usize];
                let width = size * DIGIT_WIDTH;
                let middle = top + size / 2.0;
                let bottom = top + size;
                let right = left + width;
                let segments = [
                    (PointF::new(left, top), PointF::new(right, top)),
                    (PointF::new(right, top), PointF::new(right, middle)),
                    (PointF::new(right, middle), PointF::new(right, bottom)),
                    (PointF::new(left, bottom), PointF::new(right, bottom)),
                    (PointF::new(left, middle), PointF::new(left, bottom)),
                    (PointF::new(left, top), PointF::new(left, middle)),
                    (PointF::new(left, middle), PointF::new(right, middle)),
                ];
                for (bit, (from, to)) in segments.into_iter().enumerate() {
                    if bits & (1 << bit) != 0 {
                        push_segment(out, from, to, color, thickness);
                    }
                }
            }
            '.' => push_circle(
                out,
                PointF::new(left + thickness, top + size - thickness),
                thickness,
                color,
            ),
            _ => {
                let block = RectF::new(left, top + size * 0.3, advance * 0.8, size * 0.55);
                out.push(ShapeInstanceGpu::new(
                    ShapeKind::Fill,
                    block.expanded(1.0),
                    color.with_alpha(color.a * 0.6),
                    rect_to_array(block),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_protocol::GridMajor;

    fn no_targets(_: TargetId) -> Option<(u32, u32)> {
        None
    }

    #[test]
    fn fill_is_transformed_into_target_pixels() {
        let commands = [DrawCommand::FillRect {
            rect: RectF::new(10.0, 20.0, 30.0, 40.0),
            color: Color::BLACK,
            corner_radius: 2.0,
        }];
        let out = tessellate(&commands, Affine::new(2.0, 5.0, 0.0), None, no_targets);
        assert_eq!(out.instances.len(), 1);
        let instance = out.instances[0];
        assert_eq!(instance.kind(), ShapeKind::Fill as u32);
        assert_eq!(instance.geometry, [25.0, 40.0, 60.0, 80.0]);
        assert_eq!(instance.params[1], 4.0);
        assert_eq!(out.batches, vec![Batch::Shapes(0..1)]);
    }

    #[test]
    fn clip_drops_commands_outside() {
        let commands = [
            DrawCommand::FillRect {
                rect: RectF::new(0.0, 0.0, 10.0, 10.0),
                color: Color::BLACK,
                corner_radius: 0.0,
            },
            DrawCommand::FillRect {
                rect: RectF::new(500.0, 500.0, 10.0, 10.0),
                color: Color::BLACK,
                corner_radius: 0.0,
            },
        ];
        let out = tessellate(
            &commands,
            Affine::IDENTITY,
            Some(RectF::new(0.0, 0.0, 100.0, 100.0)),
            no_targets,
        );
        assert_eq!(out.instances.len(), 1);
    }

    #[test]
    fn blits_split_batches_in_order() {
        let fill = DrawCommand::FillRect {
            rect: RectF::new(0.0, 0.0, 4.0, 4.0),
            color: Color::WHITE,
            corner_radius: 0.0,
        };
        let commands = [
            fill.clone(),
            fill.clone(),
            DrawCommand::Blit {
                source: TargetId(7),
                source_rect: Some(RectF::new(16.0, 0.0, 16.0, 8.0)),
                dest: RectF::new(0.0, 0.0, 8.0, 4.0),
            },
            fill,
        ];
        let out = tessellate(&commands, Affine::IDENTITY, None, |target| {
            (target == TargetId(7)).then_some((64, 16))
        });
        assert_eq!(
            out.batches,
            vec![
                Batch::Shapes(0..2),
                Batch::Blit {
                    source: TargetId(7),
                    instance: 2
                },
                Batch::Shapes(3..4),
            ]
        );
        assert_eq!(out.instances[2].geometry, [0.25, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn grid_marks_major_dots() {
        let commands = [DrawCommand::DotGrid {
            area: RectF::new(0.0, 0.0, 40.0, 0.0),
            spacing: 10.0,
            dot_size: 2.0,
            color: Color::BLACK,
            major: Some(GridMajor {
                every: 4,
                color: Color::WHITE,
            }),
        }];
        let out = tessellate(&commands, Affine::IDENTITY, None, no_targets);
        assert_eq!(out.instances.len(), 5);
        let majors = out
            .instances
            .iter()
            .filter(|instance| instance.color == Color::WHITE.to_array())
            .count();
        assert_eq!(majors, 2);
    }

    #[test]
    fn digits_use_segments() {
        let out = tessellate(
            &[DrawCommand::Text {
                origin: PointF::new(0.0, 0.0),
                text: "18".to_owned(),
                size: 10.0,
                color: Color::BLACK,
            }],
            Affine::IDENTITY,
            None,
            no_targets,
        );
        assert_eq!(out.instances.len(), 2 + 7);
    }
}
