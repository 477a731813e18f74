//! Chart rendering using Plotters
//!
//! Every chart is drawn on its own in-memory canvas, cropped to the drawn
//! content, PNG encoded and returned as a base64 string. Nothing is shared
//! between charts or between requests.

use std::io::Cursor;
use std::ops::Range;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{imageops, ImageFormat, Rgb, RgbImage};
use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use serde::Serialize;
use tracing::{debug, warn};

use crate::data::NumericProjection;
use crate::error::{Error, Result};
use crate::model::KMeansModel;

/// Canvas size in pixels before cropping
pub const CHART_SIZE: (u32, u32) = (600, 400);

/// Pixels of background kept around the cropped content
const CROP_PADDING: u32 = 4;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Color palette for different clusters
const CLUSTER_COLORS: [RGBColor; 5] = [RED, BLUE, GREEN, YELLOW, MAGENTA];

/// Fill for correlation cells that are undefined (constant columns)
const UNDEFINED_CELL: RGBColor = RGBColor(200, 200, 200);
const NEGATIVE_END: RGBColor = RGBColor(59, 76, 192);
const POSITIVE_END: RGBColor = RGBColor(180, 4, 38);

/// The four rendered charts, base64-encoded PNG
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Charts {
    pub scatter: String,
    pub heatmap: String,
    pub boxplot: String,
    pub bar: String,
}

/// Render scatter, heatmap, box plot and bar chart in that order
///
/// # Arguments
/// * `projection` - Numeric columns the model was fitted on
/// * `model` - Fitted K-Means model with cluster assignments
///
/// # Returns
/// * `Charts` holding each plot as a base64-encoded PNG
pub fn render_charts(projection: &NumericProjection, model: &KMeansModel) -> Result<Charts> {
    let text = fonts_available();
    if !text {
        warn!("No usable font found, rendering charts without text");
    }

    let scatter = render_chart(|root| draw_scatter(root, projection, model, text))?;
    let heatmap = render_chart(|root| draw_heatmap(root, projection, text))?;
    let boxplot = render_chart(|root| draw_boxplot(root, projection, text))?;
    let bar = render_chart(|root| draw_cluster_counts(root, model, text))?;

    debug!(
        "Rendered charts: scatter {}B, heatmap {}B, boxplot {}B, bar {}B (base64)",
        scatter.len(),
        heatmap.len(),
        boxplot.len(),
        bar.len()
    );

    Ok(Charts {
        scatter,
        heatmap,
        boxplot,
        bar,
    })
}

/// Whether the plotting backend can lay out text on this host
pub fn fonts_available() -> bool {
    ("sans-serif", 12.0).into_font().box_size("0").is_ok()
}

/// Draw on a fresh canvas and return the cropped PNG as base64
fn render_chart<F>(draw: F) -> Result<String>
where
    F: FnOnce(&DrawingArea<BitMapBackend<'_>, Shift>) -> Result<()>,
{
    let (width, height) = CHART_SIZE;
    let mut buffer = vec![0u8; (width * height * 3) as usize];

    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE)?;
        draw(&root)?;
        root.present()?;
    }

    let canvas = RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| Error::Render("canvas buffer does not match chart size".to_string()))?;
    let png = encode_png(&crop_to_content(&canvas))?;

    Ok(STANDARD.encode(png))
}

/// Crop an image to the bounding box of its non-background pixels
fn crop_to_content(canvas: &RgbImage) -> RgbImage {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in canvas.enumerate_pixels() {
        if *pixel == BACKGROUND {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((left, top, right, bottom)) => {
                (left.min(x), top.min(y), right.max(x), bottom.max(y))
            }
        });
    }

    // Blank canvas
    let Some((left, top, right, bottom)) = bounds else {
        return canvas.clone();
    };

    let left = left.saturating_sub(CROP_PADDING);
    let top = top.saturating_sub(CROP_PADDING);
    let right = (right + CROP_PADDING).min(canvas.width() - 1);
    let bottom = (bottom + CROP_PADDING).min(canvas.height() - 1);

    imageops::crop_imm(canvas, left, top, right - left + 1, bottom - top + 1).to_image()
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn chart_builder<'a, 'b, DB: DrawingBackend>(
    root: &'a DrawingArea<DB, Shift>,
    title: &'b str,
    text: bool,
) -> ChartBuilder<'a, 'b, DB> {
    let mut builder = ChartBuilder::on(root);
    builder.margin(10);
    if text {
        builder
            .caption(title, ("sans-serif", 20))
            .x_label_area_size(40)
            .y_label_area_size(60);
    }
    builder
}

fn cluster_color(cluster: usize) -> RGBColor {
    CLUSTER_COLORS.get(cluster).copied().unwrap_or(BLACK)
}

/// Value range with a little padding, never empty
fn padded_range(values: &[f64]) -> Range<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    if min == max {
        return (min - 1.0)..(max + 1.0);
    }

    let padding = (max - min) * 0.05;
    (min - padding)..(max + padding)
}

/// Scatter plot of two numeric dimensions colored by cluster
///
/// Uses the first two numeric columns. With a single numeric column the
/// cluster label goes on the x axis instead.
fn draw_scatter<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    projection: &NumericProjection,
    model: &KMeansModel,
    text: bool,
) -> Result<()> {
    let (x_desc, xs, y_desc, ys) = if projection.n_columns() >= 2 {
        (
            projection.columns[0].clone(),
            projection.column(0),
            projection.columns[1].clone(),
            projection.column(1),
        )
    } else {
        (
            "Cluster".to_string(),
            model.labels.iter().map(|&label| label as f64).collect(),
            projection.columns[0].clone(),
            projection.column(0),
        )
    };

    let mut chart = chart_builder(root, "Cluster Scatter Plot", text)
        .build_cartesian_2d(padded_range(&xs), padded_range(&ys))?;

    let mut mesh = chart.configure_mesh();
    if text {
        mesh.x_desc(x_desc)
            .y_desc(y_desc)
            .axis_desc_style(("sans-serif", 15));
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw()?;

    for cluster in 0..model.n_clusters {
        let color = cluster_color(cluster);
        let points: Vec<(f64, f64)> = xs
            .iter()
            .zip(ys.iter())
            .zip(model.labels.iter())
            .filter(|&(_, &label)| label == cluster)
            .map(|((&x, &y), _)| (x, y))
            .collect();

        let series = chart.draw_series(
            points
                .into_iter()
                .map(|point| Circle::new(point, 4, color.filled())),
        )?;
        if text {
            series
                .label(format!("Cluster {}", cluster))
                .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
        }
    }

    if text {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    Ok(())
}

/// Pearson correlation between every pair of columns
///
/// Pairs involving a constant column are undefined and come back as NaN.
pub fn correlation_matrix(values: &Array2<f64>) -> Array2<f64> {
    let n_columns = values.ncols();
    let n_rows = values.nrows().max(1) as f64;

    let centered: Vec<Vec<f64>> = values
        .columns()
        .into_iter()
        .map(|column| {
            let mean = column.sum() / n_rows;
            column.iter().map(|v| v - mean).collect()
        })
        .collect();
    let norms: Vec<f64> = centered
        .iter()
        .map(|column| column.iter().map(|v| v * v).sum::<f64>().sqrt())
        .collect();

    Array2::from_shape_fn((n_columns, n_columns), |(i, j)| {
        let denominator = norms[i] * norms[j];
        if denominator == 0.0 {
            return f64::NAN;
        }
        let covariance: f64 = centered[i]
            .iter()
            .zip(centered[j].iter())
            .map(|(a, b)| a * b)
            .sum();
        (covariance / denominator).clamp(-1.0, 1.0)
    })
}

/// Diverging blue-white-red color for a correlation coefficient
fn correlation_color(r: f64) -> RGBColor {
    if !r.is_finite() {
        return UNDEFINED_CELL;
    }

    let (end, t) = if r < 0.0 {
        (NEGATIVE_END, -r)
    } else {
        (POSITIVE_END, r)
    };
    let blend = |from: u8, to: u8| (from as f64 + (to as f64 - from as f64) * t).round() as u8;
    RGBColor(blend(255, end.0), blend(255, end.1), blend(255, end.2))
}

/// Width of one category on the integer axes of the heatmap, box plot and bar chart
const SLOT: i32 = 10;

/// Axis positions at the middle of each category slot
fn slot_centers(n: usize) -> Vec<i32> {
    (0..n as i32).map(|i| i * SLOT + SLOT / 2).collect()
}

/// Category index of an axis position
fn slot_index(v: i32) -> usize {
    (v.max(0) / SLOT) as usize
}

/// Correlation heatmap over all numeric columns
fn draw_heatmap<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    projection: &NumericProjection,
    text: bool,
) -> Result<()> {
    let n = projection.n_columns();
    let extent = n as i32 * SLOT;
    let correlations = correlation_matrix(&projection.values);

    let mut chart = chart_builder(root, "Correlation Heatmap", text).build_cartesian_2d(
        (0..extent).with_key_points(slot_centers(n)),
        (0..extent).with_key_points(slot_centers(n)),
    )?;

    // Rows are laid out top to bottom, so slot 0 on y is the last column
    let x_names = |v: &i32| {
        projection
            .columns
            .get(slot_index(*v))
            .cloned()
            .unwrap_or_default()
    };
    let y_names = |v: &i32| {
        (n - 1)
            .checked_sub(slot_index(*v))
            .and_then(|row| projection.columns.get(row).cloned())
            .unwrap_or_default()
    };

    let mut mesh = chart.configure_mesh();
    mesh.disable_mesh();
    if text {
        mesh.x_label_formatter(&x_names).y_label_formatter(&y_names);
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw()?;

    let cells: Vec<(i32, i32, f64)> = correlations
        .indexed_iter()
        .map(|((i, j), &r)| (j as i32 * SLOT, (n - 1 - i) as i32 * SLOT, r))
        .collect();

    chart.draw_series(cells.iter().map(|&(x, y, r)| {
        Rectangle::new([(x, y), (x + SLOT, y + SLOT)], correlation_color(r).filled())
    }))?;

    if text {
        let style = ("sans-serif", 12.0)
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Center));
        chart.draw_series(
            cells
                .iter()
                .filter(|cell| cell.2.is_finite())
                .map(|&(x, y, r)| {
                    Text::new(
                        format!("{:.2}", r),
                        (x + SLOT / 2, y + SLOT / 2),
                        style.clone(),
                    )
                }),
        )?;
    }

    Ok(())
}

/// Box plot of every numeric column's distribution
fn draw_boxplot<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    projection: &NumericProjection,
    text: bool,
) -> Result<()> {
    let n = projection.n_columns();
    let quartiles: Vec<Quartiles> = (0..n)
        .map(|index| Quartiles::new(&projection.column(index)))
        .collect();
    let range = boxplot_range(&projection.values, &quartiles);

    let mut chart = chart_builder(root, "Box Plot of Numeric Features", text).build_cartesian_2d(
        (0..n as i32 * SLOT).with_key_points(slot_centers(n)),
        range.start as f32..range.end as f32,
    )?;

    let names = |v: &i32| {
        projection
            .columns
            .get(slot_index(*v))
            .cloned()
            .unwrap_or_default()
    };

    let mut mesh = chart.configure_mesh();
    mesh.disable_x_mesh();
    if text {
        mesh.x_label_formatter(&names);
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw()?;

    chart.draw_series(slot_centers(n).into_iter().zip(&quartiles).enumerate().map(
        |(index, (center, quartiles))| {
            Boxplot::new_vertical(center, quartiles)
                .width(20)
                .whisker_width(0.5)
                .style(Palette99::pick(index).stroke_width(2))
        },
    ))?;

    Ok(())
}

/// Y range of the box plot
///
/// Whiskers end at the 1.5 IQR fences, which may lie beyond the data.
fn boxplot_range(values: &Array2<f64>, quartiles: &[Quartiles]) -> Range<f64> {
    let mut extent: Vec<f64> = values.iter().copied().collect();
    for q in quartiles {
        let [lower_fence, _, _, _, upper_fence] = q.values();
        extent.push(lower_fence as f64);
        extent.push(upper_fence as f64);
    }
    padded_range(&extent)
}

/// Bar chart of rows per cluster
fn draw_cluster_counts<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    model: &KMeansModel,
    text: bool,
) -> Result<()> {
    let cluster_sizes = model.cluster_sizes();
    let max_size = cluster_sizes.iter().copied().max().unwrap_or(1).max(1) as f64;

    let mut chart = chart_builder(root, "Cluster Count Bar Chart", text).build_cartesian_2d(
        (0..model.n_clusters as i32 * SLOT).with_key_points(slot_centers(model.n_clusters)),
        0f64..(max_size * 1.1),
    )?;

    let cluster_names = |v: &i32| slot_index(*v).to_string();

    let mut mesh = chart.configure_mesh();
    mesh.disable_x_mesh();
    if text {
        mesh.x_label_formatter(&cluster_names)
            .x_desc("Cluster")
            .y_desc("Rows")
            .axis_desc_style(("sans-serif", 15));
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw()?;

    chart.draw_series(cluster_sizes.iter().enumerate().map(|(cluster, &size)| {
        let x = cluster as i32 * SLOT;
        Rectangle::new(
            [(x + 1, 0.0), (x + SLOT - 1, size as f64)],
            cluster_color(cluster).filled(),
        )
    }))?;

    Ok(())
}
