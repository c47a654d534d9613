#[test]
fn renderer_wgsl_sources_parse_successfully() {
    parse_wgsl("canvas_shapes.wgsl", include_str!("canvas_shapes.wgsl"));
}

fn parse_wgsl(label: &str, source: &str) {
    naga::front::wgsl::parse_str(source).unwrap_or_else(|error| {
        panic!(
            "WGSL parse failed for {label}: {}",
            error.emit_to_string(source)
        )
    });
}
