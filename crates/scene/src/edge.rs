use document_protocol::ConnectionId;
use model::{PointF, Rect};
use render_protocol::{Color, DrawCommand, DrawList, RectF, flatten_cubic};

use crate::node::PortRef;

const CURVE_SEGMENTS: usize = 16;
const MIN_CONTROL_OFFSET: f32 = 20.0;
const MAX_CONTROL_OFFSET: f32 = 100.0;

/// Cached geometry of an edge in canvas coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgePath {
    Curve {
        from: PointF,
        control_a: PointF,
        control_b: PointF,
        to: PointF,
    },
    /// User-routed path through explicit points, endpoints included.
    Segmented(Vec<PointF>),
}

impl EdgePath {
    pub fn between(from: PointF, to: PointF, waypoints: &[PointF]) -> Self {
        if !waypoints.is_empty() {
            let mut points = Vec::with_capacity(waypoints.len() + 2);
            points.push(from);
            points.extend_from_slice(waypoints);
            points.push(to);
            return EdgePath::Segmented(points);
        }
        let offset = ((to.y - from.y).abs() / 2.0).clamp(MIN_CONTROL_OFFSET, MAX_CONTROL_OFFSET);
        EdgePath::Curve {
            from,
            control_a: PointF::new(from.x, from.y + offset),
            control_b: PointF::new(to.x, to.y - offset),
            to,
        }
    }

    pub fn points(&self) -> Vec<PointF> {
        match self {
            EdgePath::Curve {
                from,
                control_a,
                control_b,
                to,
            } => flatten_cubic(*from, *control_a, *control_b, *to, CURVE_SEGMENTS),
            EdgePath::Segmented(points) => points.clone(),
        }
    }

    pub fn bounds(&self) -> Rect {
        let points = match self {
            EdgePath::Curve {
                from,
                control_a,
                control_b,
                to,
            } => vec![*from, *control_a, *control_b, *to],
            EdgePath::Segmented(points) => points.clone(),
        };
        let Some(first) = points.first() else {
            return Rect::EMPTY;
        };
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for point in &points[1..] {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }
        // Pad so horizontal or vertical edges still have area.
        RectF::new(min_x, min_y, max_x - min_x, max_y - min_y)
            .expanded(2.0)
            .to_rect_outward()
    }

    pub fn distance_to(&self, point: PointF) -> f32 {
        self.points()
            .windows(2)
            .map(|segment| point.distance_to_segment(segment[0], segment[1]))
            .fold(f32::INFINITY, f32::min)
    }

    /// True if any part of the path lies inside `rect`.
    pub fn intersects(&self, rect: Rect) -> bool {
        if !self.bounds().intersects(&rect) {
            return false;
        }
        self.points()
            .windows(2)
            .any(|segment| segment_intersects_rect(segment[0], segment[1], rect))
    }

    pub fn render(&self, color: Color, width: f32, list: &mut DrawList) {
        match self {
            EdgePath::Curve {
                from,
                control_a,
                control_b,
                to,
            } => list.push(DrawCommand::Bezier {
                from: *from,
                control_a: *control_a,
                control_b: *control_b,
                to: *to,
                color,
                width,
            }),
            EdgePath::Segmented(points) => {
                for segment in points.windows(2) {
                    list.push(DrawCommand::Line {
                        from: segment[0],
                        to: segment[1],
                        color,
                        width,
                    });
                }
            }
        }
    }
}

fn segment_intersects_rect(start: PointF, end: PointF, rect: Rect) -> bool {
    // Liang-Barsky clip of the segment against the rectangle.
    let (left, top) = (rect.x as f32, rect.y as f32);
    let (right, bottom) = (rect.right() as f32, rect.bottom() as f32);
    let delta_x = end.x - start.x;
    let delta_y = end.y - start.y;
    let mut t0 = 0.0_f32;
    let mut t1 = 1.0_f32;
    for (p, q) in [
        (-delta_x, start.x - left),
        (delta_x, right - start.x),
        (-delta_y, start.y - top),
        (delta_y, bottom - start.y),
    ] {
        if p.abs() <= f32::EPSILON {
            if q < 0.0 {
                return false;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return false;
        }
    }
    true
}

/// Waypoints of a user-routed edge, stored in the document as an opaque
/// string (`"x,y;x,y"`).
pub fn encode_route(waypoints: &[PointF]) -> Option<String> {
    if waypoints.is_empty() {
        return None;
    }
    Some(
        waypoints
            .iter()
            .map(|point| format!("{},{}", point.x, point.y))
            .collect::<Vec<_>>()
            .join(";"),
    )
}

/// Inverse of [`encode_route`]. Unreadable state yields no waypoints.
pub fn decode_route(path_state: &str) -> Vec<PointF> {
    let parsed: Option<Vec<PointF>> = path_state
        .split(';')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let (x, y) = part.split_once(',')?;
            Some(PointF::new(x.trim().parse().ok()?, y.trim().parse().ok()?))
        })
        .collect();
    parsed.unwrap_or_default()
}

/// Visual counterpart of one document connection.
#[derive(Debug, Clone)]
pub struct VisualEdge {
    handle: ConnectionId,
    source: PortRef,
    destination: PortRef,
    signal: bool,
    path: EdgePath,
    path_state: Option<String>,
    waypoints: Vec<PointF>,
}

impl VisualEdge {
    pub fn new(
        handle: ConnectionId,
        source: PortRef,
        destination: PortRef,
        signal: bool,
        from: PointF,
        to: PointF,
        path_state: Option<String>,
    ) -> Self {
        let waypoints = path_state.as_deref().map(decode_route).unwrap_or_default();
        Self {
            handle,
            source,
            destination,
            signal,
            path: EdgePath::between(from, to, &waypoints),
            path_state,
            waypoints,
        }
    }

    pub fn handle(&self) -> ConnectionId {
        self.handle
    }

    pub fn source(&self) -> PortRef {
        self.source
    }

    pub fn destination(&self) -> PortRef {
        self.destination
    }

    pub fn is_signal(&self) -> bool {
        self.signal
    }

    pub fn path(&self) -> &EdgePath {
        &self.path
    }

    pub fn path_state(&self) -> Option<&str> {
        self.path_state.as_deref()
    }

    /// Recomputes geometry from the current port anchors and the document's
    /// path state. Returns `true` if the path changed.
    pub fn refresh(&mut self, from: PointF, to: PointF, path_state: Option<&str>) -> bool {
        if self.path_state.as_deref() != path_state {
            self.path_state = path_state.map(str::to_owned);
            self.waypoints = path_state.map(decode_route).unwrap_or_default();
        }
        let path = EdgePath::between(from, to, &self.waypoints);
        if path == self.path {
            return false;
        }
        self.path = path;
        true
    }

    /// Applies a user routing change; returns the state to store in the
    /// document.
    pub fn set_waypoints(&mut self, waypoints: Vec<PointF>) -> Option<String> {
        let (from, to) = match &self.path {
            EdgePath::Curve { from, to, .. } => (*from, *to),
            EdgePath::Segmented(points) => (
                points.first().copied().unwrap_or_default(),
                points.last().copied().unwrap_or_default(),
            ),
        };
        self.path_state = encode_route(&waypoints);
        self.path = EdgePath::between(from, to, &waypoints);
        self.waypoints = waypoints;
        self.path_state.clone()
    }
}

/// Connection being dragged out of a port, not yet in the document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingEdge {
    pub source: PortRef,
    pub cursor: PointF,
}
