use model::{PointF, Rect};

/// Backend-issued handle of a render target (an offscreen framebuffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Physical pixel size of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn rect(&self) -> Rect {
        Rect::new(
            0,
            0,
            i32::try_from(self.width).unwrap_or(i32::MAX),
            i32::try_from(self.height).unwrap_or(i32::MAX),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            f32::from(a) / 255.0,
        )
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    /// Linear interpolation towards `other`; used for darker grid majors.
    pub fn mix(self, other: Color, t: f32) -> Self {
        Self::new(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
            self.a + (other.a - self.a) * t,
        )
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn expanded(&self, amount: f32) -> Self {
        Self::new(
            self.x - amount,
            self.y - amount,
            self.width + amount * 2.0,
            self.height + amount * 2.0,
        )
    }

    /// Smallest integer rectangle covering `self`.
    pub fn to_rect_outward(&self) -> Rect {
        let min_x = self.x.floor() as i32;
        let min_y = self.y.floor() as i32;
        let max_x = self.right().ceil() as i32;
        let max_y = self.bottom().ceil() as i32;
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn from_points(first: PointF, second: PointF) -> Self {
        let min_x = first.x.min(second.x);
        let min_y = first.y.min(second.y);
        Self::new(
            min_x,
            min_y,
            first.x.max(second.x) - min_x,
            first.y.max(second.y) - min_y,
        )
    }
}

impl From<Rect> for RectF {
    fn from(rect: Rect) -> Self {
        Self::new(
            rect.x as f32,
            rect.y as f32,
            rect.width as f32,
            rect.height as f32,
        )
    }
}

/// Uniform scale followed by translation; the only transform a canvas pass
/// needs (zoom, scroll and device pixel scale).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub scale: f32,
    pub translate_x: f32,
    pub translate_y: f32,
}

impl Affine {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        translate_x: 0.0,
        translate_y: 0.0,
    };

    pub const fn new(scale: f32, translate_x: f32, translate_y: f32) -> Self {
        Self {
            scale,
            translate_x,
            translate_y,
        }
    }

    pub const fn scale(scale: f32) -> Self {
        Self::new(scale, 0.0, 0.0)
    }

    /// `self` applied after `first`.
    pub fn after(self, first: Affine) -> Self {
        Self {
            scale: self.scale * first.scale,
            translate_x: first.translate_x * self.scale + self.translate_x,
            translate_y: first.translate_y * self.scale + self.translate_y,
        }
    }

    pub fn apply(&self, point: PointF) -> PointF {
        PointF::new(
            point.x * self.scale + self.translate_x,
            point.y * self.scale + self.translate_y,
        )
    }

    pub fn apply_rect(&self, rect: RectF) -> RectF {
        RectF::new(
            rect.x * self.scale + self.translate_x,
            rect.y * self.scale + self.translate_y,
            rect.width * self.scale,
            rect.height * self.scale,
        )
    }

    /// Maps a device rectangle back into the source space, rounded outward.
    pub fn inverse_rect(&self, rect: Rect) -> Rect {
        if self.scale.abs() <= f32::EPSILON {
            return Rect::EMPTY;
        }
        RectF::new(
            (rect.x as f32 - self.translate_x) / self.scale,
            (rect.y as f32 - self.translate_y) / self.scale,
            rect.width as f32 / self.scale,
            rect.height as f32 / self.scale,
        )
        .to_rect_outward()
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    FillRect {
        rect: RectF,
        color: Color,
        corner_radius: f32,
    },
    StrokeRect {
        rect: RectF,
        color: Color,
        width: f32,
        corner_radius: f32,
    },
    Line {
        from: PointF,
        to: PointF,
        color: Color,
        width: f32,
    },
    FillCircle {
        centre: PointF,
        radius: f32,
        color: Color,
    },
    /// Dots at every multiple of `spacing` inside `area`. When `major` is set,
    /// every `every`-th dot on both axes uses the major colour.
    DotGrid {
        area: RectF,
        spacing: f32,
        dot_size: f32,
        color: Color,
        major: Option<GridMajor>,
    },
    Bezier {
        from: PointF,
        control_a: PointF,
        control_b: PointF,
        to: PointF,
        color: Color,
        width: f32,
    },
    Shadow {
        rect: RectF,
        radius: f32,
        color: Color,
    },
    /// Composites another render target into `dest`. `source_rect` selects
    /// a sub-rectangle of the source in its pixels; `None` means all of it.
    Blit {
        source: TargetId,
        source_rect: Option<RectF>,
        dest: RectF,
    },
    Text {
        origin: PointF,
        text: String,
        size: f32,
        color: Color,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridMajor {
    pub every: u32,
    pub color: Color,
}

impl DrawCommand {
    /// Conservative bounds of the command in its own coordinate space.
    pub fn bounds(&self) -> RectF {
        match self {
            DrawCommand::FillRect { rect, .. } => *rect,
            DrawCommand::StrokeRect { rect, width, .. } => rect.expanded(width / 2.0),
            DrawCommand::Line { from, to, width, .. } => {
                RectF::from_points(*from, *to).expanded(width / 2.0)
            }
            DrawCommand::FillCircle { centre, radius, .. } => {
                RectF::new(centre.x - radius, centre.y - radius, radius * 2.0, radius * 2.0)
            }
            DrawCommand::DotGrid { area, dot_size, .. } => area.expanded(dot_size / 2.0),
            DrawCommand::Bezier {
                from,
                control_a,
                control_b,
                to,
                width,
                ..
            } => {
                let first = RectF::from_points(*from, *to);
                let second = RectF::from_points(*control_a, *control_b);
                let min_x = first.x.min(second.x);
                let min_y = first.y.min(second.y);
                RectF::new(
                    min_x,
                    min_y,
                    first.right().max(second.right()) - min_x,
                    first.bottom().max(second.bottom()) - min_y,
                )
                .expanded(width / 2.0)
            }
            DrawCommand::Shadow { rect, radius, .. } => rect.expanded(*radius),
            DrawCommand::Blit { dest, .. } => *dest,
            DrawCommand::Text {
                origin, text, size, ..
            } => RectF::new(
                origin.x,
                origin.y,
                text.chars().count() as f32 * size * 0.6,
                *size,
            ),
        }
    }
}

/// Points along a cubic Bezier, `segments + 1` of them, endpoints included.
pub fn flatten_cubic(
    from: PointF,
    control_a: PointF,
    control_b: PointF,
    to: PointF,
    segments: usize,
) -> Vec<PointF> {
    let segments = segments.max(1);
    (0..=segments)
        .map(|step| {
            let t = step as f32 / segments as f32;
            let inverse = 1.0 - t;
            let a = inverse * inverse * inverse;
            let b = 3.0 * inverse * inverse * t;
            let c = 3.0 * inverse * t * t;
            let d = t * t * t;
            PointF::new(
                a * from.x + b * control_a.x + c * control_b.x + d * to.x,
                a * from.y + b * control_a.y + c * control_b.y + d * to.y,
            )
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    pub fn extend(&mut self, other: DrawList) {
        self.commands.extend(other.commands);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl FromIterator<DrawCommand> for DrawList {
    fn from_iter<I: IntoIterator<Item = DrawCommand>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

/// One draw submission: commands in `transform` space rendered into `target`,
/// clipped to `scissor` (target pixels) when present.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPass {
    pub target: TargetId,
    pub transform: Affine,
    pub scissor: Option<Rect>,
    pub clear: Option<Color>,
    pub commands: DrawList,
}
