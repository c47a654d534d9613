use render_protocol::Color;

/// Colours used when painting the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub background: Color,
    pub grid_dot: Color,
    pub grid_major: Color,
    pub border: Color,
    pub node_fill: Color,
    pub node_outline: Color,
    pub selected: Color,
    pub text: Color,
    pub control_port: Color,
    pub signal_port: Color,
    pub edge: Color,
    pub signal_edge: Color,
    pub activity: Color,
    pub lasso_fill: Color,
    pub lasso_outline: Color,
    pub shadow: Color,
    pub scrollbar: Color,
    pub popup_fill: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            background: Color::rgba8(250, 250, 250, 255),
            grid_dot: Color::rgba8(200, 200, 200, 255),
            grid_major: Color::rgba8(150, 150, 150, 255),
            border: Color::rgba8(170, 170, 170, 255),
            node_fill: Color::rgba8(255, 255, 255, 255),
            node_outline: Color::rgba8(120, 120, 120, 255),
            selected: Color::rgba8(66, 162, 200, 255),
            text: Color::rgba8(20, 20, 20, 255),
            control_port: Color::rgba8(90, 90, 90, 255),
            signal_port: Color::rgba8(40, 120, 70, 255),
            edge: Color::rgba8(90, 90, 90, 255),
            signal_edge: Color::rgba8(40, 120, 70, 255),
            activity: Color::rgba8(240, 170, 40, 255),
            lasso_fill: Color::rgba8(66, 162, 200, 40),
            lasso_outline: Color::rgba8(66, 162, 200, 200),
            shadow: Color::rgba8(0, 0, 0, 90),
            scrollbar: Color::rgba8(0, 0, 0, 80),
            popup_fill: Color::rgba8(245, 245, 245, 250),
        }
    }
}
