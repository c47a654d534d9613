use document_protocol::ObjectKind;
use model::{PointF, Rect};
use render_protocol::{Color, DrawCommand, DrawList, RectF};

use crate::style::Palette;

const TEXT_SIZE: f32 = 12.0;
const TEXT_INSET: f32 = 4.0;
const FILTER_GRAPH_SAMPLES: usize = 48;

/// How an array is plotted, in the order the UI lists the choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayDrawMode {
    Points,
    Polygon,
    Bezier,
}

impl ArrayDrawMode {
    pub const CHOICES: &'static [&'static str] = &["Points", "Polygon", "Bezier Curve"];

    /// Document draw type to UI choice. Values outside the table fall back to
    /// polygon.
    pub fn from_document(draw_type: u8) -> Self {
        match draw_type {
            0 => ArrayDrawMode::Points,
            1 => ArrayDrawMode::Polygon,
            2 => ArrayDrawMode::Bezier,
            _ => ArrayDrawMode::Polygon,
        }
    }

    /// UI choice to the value the document stores on write.
    ///
    /// Points and polygon are swapped relative to [`ArrayDrawMode::from_document`].
    /// The document's write path expects it this way; kept pending product
    /// owner confirmation.
    pub fn to_document(self) -> u8 {
        match self {
            ArrayDrawMode::Points => 1,
            ArrayDrawMode::Polygon => 0,
            ArrayDrawMode::Bezier => 2,
        }
    }

    pub fn choice_index(self) -> usize {
        match self {
            ArrayDrawMode::Points => 0,
            ArrayDrawMode::Polygon => 1,
            ArrayDrawMode::Bezier => 2,
        }
    }

    pub fn from_choice_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ArrayDrawMode::Points),
            1 => Some(ArrayDrawMode::Polygon),
            2 => Some(ArrayDrawMode::Bezier),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayContent {
    pub name: String,
    pub size: u32,
    pub draw_mode: ArrayDrawMode,
    pub save_contents: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphContent {
    pub graph_on_parent: bool,
    pub hide_text: bool,
    pub x_range: (f32, f32),
    pub y_range: (f32, f32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Float(f32),
    Int(i64),
    Bool(bool),
    Text(String),
    Choice {
        index: usize,
        options: &'static [&'static str],
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: &'static str,
    pub value: ParameterValue,
}

impl Parameter {
    fn new(name: &'static str, value: ParameterValue) -> Self {
        Self { name, value }
    }
}

/// Type-specific part of a visual node, chosen from the object's type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Text,
    Message,
    Comment,
    Knob { value: f32, min: f32, max: f32 },
    Array(ArrayContent),
    /// Biquad coefficients in feedback-first order `[fb1, fb2, ff1, ff2, ff3]`.
    FilterGraph { coefficients: [f32; 5] },
    Subgraph(SubgraphContent),
    Drawable,
}

impl NodeContent {
    pub fn from_kind(kind: &ObjectKind) -> Self {
        match kind {
            ObjectKind::Text => NodeContent::Text,
            ObjectKind::Message => NodeContent::Message,
            ObjectKind::Comment => NodeContent::Comment,
            ObjectKind::Knob { value, min, max } => NodeContent::Knob {
                value: *value,
                min: *min,
                max: *max,
            },
            ObjectKind::Array {
                name,
                size,
                draw_type,
                save_contents,
            } => NodeContent::Array(ArrayContent {
                name: name.clone(),
                size: *size,
                draw_mode: ArrayDrawMode::from_document(*draw_type),
                save_contents: *save_contents,
            }),
            ObjectKind::FilterGraph { coefficients } => NodeContent::FilterGraph {
                coefficients: *coefficients,
            },
            ObjectKind::Subgraph {
                graph_on_parent,
                hide_text,
                x_range,
                y_range,
            } => NodeContent::Subgraph(SubgraphContent {
                graph_on_parent: *graph_on_parent,
                hide_text: *hide_text,
                x_range: *x_range,
                y_range: *y_range,
            }),
            ObjectKind::Drawable => NodeContent::Drawable,
        }
    }

    /// State to write back to the document after a parameter edit.
    pub fn to_kind(&self) -> ObjectKind {
        match self {
            NodeContent::Text => ObjectKind::Text,
            NodeContent::Message => ObjectKind::Message,
            NodeContent::Comment => ObjectKind::Comment,
            NodeContent::Knob { value, min, max } => ObjectKind::Knob {
                value: *value,
                min: *min,
                max: *max,
            },
            NodeContent::Array(array) => ObjectKind::Array {
                name: array.name.clone(),
                size: array.size,
                draw_type: array.draw_mode.to_document(),
                save_contents: array.save_contents,
            },
            NodeContent::FilterGraph { coefficients } => ObjectKind::FilterGraph {
                coefficients: *coefficients,
            },
            NodeContent::Subgraph(subgraph) => ObjectKind::Subgraph {
                graph_on_parent: subgraph.graph_on_parent,
                hide_text: subgraph.hide_text,
                x_range: subgraph.x_range,
                y_range: subgraph.y_range,
            },
            NodeContent::Drawable => ObjectKind::Drawable,
        }
    }

    pub fn draws_behind(&self) -> bool {
        matches!(self, NodeContent::Drawable)
    }

    /// Border drawn around a graph-on-parent subgraph.
    pub fn nested_border(&self, bounds: Rect) -> Option<Rect> {
        match self {
            NodeContent::Subgraph(subgraph) if subgraph.graph_on_parent => Some(bounds),
            _ => None,
        }
    }

    pub fn hit_test(&self, bounds: Rect, point: PointF) -> bool {
        match self {
            NodeContent::Knob { .. } => {
                let centre = bounds.centre();
                let radius = bounds.width.min(bounds.height) as f32 / 2.0;
                point.distance_to(centre) <= radius
            }
            _ => bounds.contains_f(point),
        }
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        match self {
            NodeContent::Knob { value, min, max } => vec![
                Parameter::new("value", ParameterValue::Float(*value)),
                Parameter::new("min", ParameterValue::Float(*min)),
                Parameter::new("max", ParameterValue::Float(*max)),
            ],
            NodeContent::Array(array) => vec![
                Parameter::new("name", ParameterValue::Text(array.name.clone())),
                Parameter::new("size", ParameterValue::Int(i64::from(array.size))),
                Parameter::new(
                    "draw_mode",
                    ParameterValue::Choice {
                        index: array.draw_mode.choice_index(),
                        options: ArrayDrawMode::CHOICES,
                    },
                ),
                Parameter::new("save_contents", ParameterValue::Bool(array.save_contents)),
            ],
            NodeContent::Subgraph(subgraph) => vec![
                Parameter::new(
                    "graph_on_parent",
                    ParameterValue::Bool(subgraph.graph_on_parent),
                ),
                Parameter::new("hide_text", ParameterValue::Bool(subgraph.hide_text)),
            ],
            NodeContent::FilterGraph { coefficients } => ["fb1", "fb2", "ff1", "ff2", "ff3"]
                .iter()
                .zip(coefficients)
                .map(|(name, value)| Parameter::new(*name, ParameterValue::Float(*value)))
                .collect(),
            NodeContent::Text
            | NodeContent::Message
            | NodeContent::Comment
            | NodeContent::Drawable => Vec::new(),
        }
    }

    /// Applies a parameter edit. Returns `false` when the name or value type
    /// does not apply to this content.
    pub fn set_parameter(&mut self, name: &str, value: &ParameterValue) -> bool {
        match (self, name, value) {
            (NodeContent::Knob { value: current, min, max }, "value", ParameterValue::Float(next)) => {
                *current = next.clamp(min.min(*max), max.max(*min));
                true
            }
            (NodeContent::Knob { min, .. }, "min", ParameterValue::Float(next)) => {
                *min = *next;
                true
            }
            (NodeContent::Knob { max, .. }, "max", ParameterValue::Float(next)) => {
                *max = *next;
                true
            }
            (NodeContent::Array(array), "name", ParameterValue::Text(next)) => {
                array.name = next.clone();
                true
            }
            (NodeContent::Array(array), "size", ParameterValue::Int(next)) => {
                match u32::try_from(*next) {
                    Ok(size) if size > 0 => {
                        array.size = size;
                        true
                    }
                    _ => false,
                }
            }
            (NodeContent::Array(array), "draw_mode", ParameterValue::Choice { index, .. }) => {
                match ArrayDrawMode::from_choice_index(*index) {
                    Some(mode) => {
                        array.draw_mode = mode;
                        true
                    }
                    None => false,
                }
            }
            (NodeContent::Array(array), "save_contents", ParameterValue::Bool(next)) => {
                array.save_contents = *next;
                true
            }
            (NodeContent::Subgraph(subgraph), "graph_on_parent", ParameterValue::Bool(next)) => {
                subgraph.graph_on_parent = *next;
                true
            }
            (NodeContent::Subgraph(subgraph), "hide_text", ParameterValue::Bool(next)) => {
                subgraph.hide_text = *next;
                true
            }
            (NodeContent::FilterGraph { coefficients }, name, ParameterValue::Float(next)) => {
                let slot = ["fb1", "fb2", "ff1", "ff2", "ff3"]
                    .iter()
                    .position(|candidate| *candidate == name);
                match slot {
                    Some(slot) => {
                        coefficients[slot] = *next;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Paints the node body (not its ports) in canvas coordinates.
    pub fn render(
        &self,
        bounds: Rect,
        text: &str,
        selected: bool,
        palette: &Palette,
        list: &mut DrawList,
    ) {
        let rect = RectF::from(bounds);
        let outline = if selected {
            palette.selected
        } else {
            palette.node_outline
        };
        match self {
            NodeContent::Comment => {
                push_text(list, rect, text, palette.text);
                if selected {
                    list.push(DrawCommand::StrokeRect {
                        rect,
                        color: palette.selected,
                        width: 1.0,
                        corner_radius: 0.0,
                    });
                }
            }
            NodeContent::Drawable => {
                list.push(DrawCommand::FillRect {
                    rect,
                    color: palette.grid_dot.with_alpha(0.5),
                    corner_radius: 0.0,
                });
            }
            NodeContent::Knob { value, min, max } => {
                push_body(list, rect, palette.node_fill, outline);
                let centre = bounds.centre();
                let radius = bounds.width.min(bounds.height) as f32 / 2.0 - 3.0;
                list.push(DrawCommand::FillCircle {
                    centre,
                    radius: radius.max(1.0),
                    color: palette.grid_dot,
                });
                let range = max - min;
                let normalised = if range.abs() > f32::EPSILON {
                    ((value - min) / range).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let angle = (-225.0_f32 + normalised * 270.0).to_radians();
                list.push(DrawCommand::Line {
                    from: centre,
                    to: PointF::new(
                        centre.x + angle.cos() * radius,
                        centre.y + angle.sin() * radius,
                    ),
                    color: palette.text,
                    width: 2.0,
                });
            }
            NodeContent::Array(array) => {
                push_body(list, rect, palette.node_fill, outline);
                render_array(array, rect, palette, list);
                push_text(list, rect, &array.name, palette.text);
            }
            NodeContent::FilterGraph { coefficients } => {
                push_body(list, rect, palette.node_fill, outline);
                render_filter_response(coefficients, rect, palette, list);
            }
            NodeContent::Subgraph(subgraph) => {
                push_body(list, rect, palette.node_fill, outline);
                if !subgraph.hide_text {
                    push_text(list, rect, text, palette.text);
                }
            }
            NodeContent::Message => {
                push_body(list, rect, palette.node_fill, outline);
                // Flag notch on the right edge.
                list.push(DrawCommand::Line {
                    from: PointF::new(rect.right() - 4.0, rect.y),
                    to: PointF::new(rect.right(), rect.y + 4.0),
                    color: outline,
                    width: 1.0,
                });
                push_text(list, rect, text, palette.text);
            }
            NodeContent::Text => {
                push_body(list, rect, palette.node_fill, outline);
                push_text(list, rect, text, palette.text);
            }
        }
    }
}

fn push_body(list: &mut DrawList, rect: RectF, fill: Color, outline: Color) {
    list.push(DrawCommand::FillRect {
        rect,
        color: fill,
        corner_radius: 2.0,
    });
    list.push(DrawCommand::StrokeRect {
        rect,
        color: outline,
        width: 1.0,
        corner_radius: 2.0,
    });
}

fn push_text(list: &mut DrawList, rect: RectF, text: &str, color: Color) {
    if text.is_empty() {
        return;
    }
    list.push(DrawCommand::Text {
        origin: PointF::new(rect.x + TEXT_INSET, rect.y + (rect.height - TEXT_SIZE) / 2.0),
        text: text.to_owned(),
        size: TEXT_SIZE,
        color,
    });
}

fn render_array(array: &ArrayContent, rect: RectF, palette: &Palette, list: &mut DrawList) {
    let baseline = rect.y + rect.height / 2.0;
    let left = PointF::new(rect.x + 2.0, baseline);
    let right = PointF::new(rect.right() - 2.0, baseline);
    match array.draw_mode {
        ArrayDrawMode::Points => {
            let count = array.size.clamp(1, 64);
            for index in 0..count {
                let t = (index as f32 + 0.5) / count as f32;
                list.push(DrawCommand::FillRect {
                    rect: RectF::new(left.lerp(right, t).x - 1.0, baseline - 1.0, 2.0, 2.0),
                    color: palette.text,
                    corner_radius: 0.0,
                });
            }
        }
        ArrayDrawMode::Polygon => list.push(DrawCommand::Line {
            from: left,
            to: right,
            color: palette.text,
            width: 1.0,
        }),
        ArrayDrawMode::Bezier => list.push(DrawCommand::Bezier {
            from: left,
            control_a: left.lerp(right, 0.33),
            control_b: left.lerp(right, 0.66),
            to: right,
            color: palette.text,
            width: 1.0,
        }),
    }
}

/// Magnitude response in dB of the biquad at normalised angular frequency
/// `omega`.
pub fn biquad_magnitude_db(coefficients: &[f32; 5], omega: f32) -> f32 {
    let [fb1, fb2, ff1, ff2, ff3] = *coefficients;
    let (cos1, sin1) = (omega.cos(), omega.sin());
    let (cos2, sin2) = ((2.0 * omega).cos(), (2.0 * omega).sin());
    let numerator_re = ff1 + ff2 * cos1 + ff3 * cos2;
    let numerator_im = -(ff2 * sin1 + ff3 * sin2);
    let denominator_re = 1.0 - fb1 * cos1 - fb2 * cos2;
    let denominator_im = fb1 * sin1 + fb2 * sin2;
    let numerator = (numerator_re * numerator_re + numerator_im * numerator_im).sqrt();
    let denominator = (denominator_re * denominator_re + denominator_im * denominator_im)
        .sqrt()
        .max(f32::EPSILON);
    20.0 * (numerator / denominator).max(1e-6).log10()
}

fn render_filter_response(
    coefficients: &[f32; 5],
    rect: RectF,
    palette: &Palette,
    list: &mut DrawList,
) {
    const RANGE_DB: f32 = 24.0;
    let mut previous: Option<PointF> = None;
    for sample in 0..FILTER_GRAPH_SAMPLES {
        let t = sample as f32 / (FILTER_GRAPH_SAMPLES - 1) as f32;
        let omega = t * std::f32::consts::PI;
        let db = biquad_magnitude_db(coefficients, omega).clamp(-RANGE_DB, RANGE_DB);
        let point = PointF::new(
            rect.x + t * rect.width,
            rect.y + rect.height * (0.5 - db / (RANGE_DB * 2.0)),
        );
        if let Some(previous) = previous {
            list.push(DrawCommand::Line {
                from: previous,
                to: point,
                color: palette.selected,
                width: 1.0,
            });
        }
        previous = Some(point);
    }
}
