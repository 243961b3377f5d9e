//! `chart` module: render series into an SVG attachment
//!
//! ```lua
//! local img = require('chart').render('load', {series = {{name = 'db1', points = {{x = 1, y = 0.5}}}}})
//! require('alert').error('load', 'too high', {image = img})
//! ```

use mlua::{Lua, LuaSerdeExt, Table, Value};
use plotters::prelude::*;
use serde::Deserialize;

use super::{Module, RunContext};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 400;
const PALETTE: [RGBColor; 5] = [
    RGBColor(0x34, 0x98, 0xdb),
    RGBColor(0xe7, 0x4c, 0x3c),
    RGBColor(0x2e, 0xcc, 0x71),
    RGBColor(0xf3, 0x9c, 0x12),
    RGBColor(0x9b, 0x59, 0xb6),
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartData {
    #[serde(default)]
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub name: String,
    /// `#rrggbb`; falls back to the palette
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

pub struct ChartModule;

impl Module for ChartModule {
    fn name(&self) -> &str {
        "chart"
    }

    fn inject(&self, lua: &Lua, _ctx: &RunContext) -> mlua::Result<Table> {
        let table = lua.create_table()?;
        table.set(
            "render",
            lua.create_function(|lua, (title, data): (String, Value)| {
                let data: ChartData = match data {
                    Value::Nil => ChartData::default(),
                    other => match lua.from_value(other) {
                        Ok(data) => data,
                        Err(e) => return Ok((None, Some(format!("wrong chart data: {}", e)))),
                    },
                };

                let svg = match render_svg(&title, &data) {
                    Ok(svg) => svg,
                    Err(e) => return Ok((None, Some(e))),
                };
                let attachment = lua.create_table()?;
                attachment.set("content_type", "image/svg+xml")?;
                attachment.set("data", svg)?;
                Ok((Some(attachment), None))
            })?,
        )?;
        Ok(table)
    }
}

/// Line chart with a title and legend. Empty data renders an empty frame.
pub fn render_svg(title: &str, data: &ChartData) -> Result<String, String> {
    let (x_range, y_range) = bounds(data);

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE)
            .map_err(|e| format!("Drawing error: {}", e))?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 20).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(40)
            .build_cartesian_2d(x_range, y_range)
            .map_err(|e| format!("Chart building error: {}", e))?;

        chart
            .configure_mesh()
            .draw()
            .map_err(|e| format!("Mesh drawing error: {}", e))?;

        for (i, series) in data.series.iter().enumerate() {
            let color = series
                .color
                .as_deref()
                .and_then(parse_color)
                .unwrap_or(PALETTE[i % PALETTE.len()]);

            chart
                .draw_series(LineSeries::new(
                    series.points.iter().map(|p| (p.x, p.y)),
                    color.stroke_width(2),
                ))
                .map_err(|e| format!("Series drawing error: {}", e))?
                .label(series.name.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }

        if !data.series.is_empty() {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .map_err(|e| format!("Legend drawing error: {}", e))?;
        }

        root.present()
            .map_err(|e| format!("Present error: {}", e))?;
    }
    Ok(svg)
}

/// Axis ranges over all points, widened when empty or flat.
fn bounds(data: &ChartData) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let (mut min_x, mut max_x, mut min_y, mut max_y) =
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for p in data.series.iter().flat_map(|s| s.points.iter()) {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    if !min_x.is_finite() || !min_y.is_finite() {
        return (0.0..1.0, 0.0..1.0);
    }
    if max_x <= min_x {
        max_x = min_x + 1.0;
    }
    if max_y <= min_y {
        max_y = min_y + 1.0;
    }
    (min_x..max_x, min_y..max_y)
}

fn parse_color(hex: &str) -> Option<RGBColor> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}
