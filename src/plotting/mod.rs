//! Aggregation and Plotting
//!
//! Overlays converted Ne(t) tables on log–log axes and writes SVG files.
//! A per-tool plot shows every replicate of one tool; the final plot shows
//! all three tools on shared axes. The ground truth history of the sampled
//! population is drawn in black whenever the catalog knows it.

use std::path::{Path, PathBuf};

use log::{debug, info};
use plotters::prelude::*;

use crate::config::{Population, RunConfig};
use crate::error::{NeError, Result};
use crate::inference::{NeTable, Tool};
use crate::workflow::Layout;

const PLOT_SIZE: (u32, u32) = (1024, 768);
const TRUTH_POINTS: usize = 200;

/// One table to draw, with its legend entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub table: PathBuf,
}

/// A loaded series: strictly positive `(generations, ne)` points.
#[derive(Debug, Clone)]
pub struct Curve {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

/// Every table one tool produces for this run, labelled by seed (and
/// MSMC sample size).
pub fn tool_series(config: &RunConfig, tool: Tool) -> Vec<Series> {
    let layout = Layout::new(&config.output_root);
    let mut series = Vec::new();

    for &seed in &config.seeds {
        match tool {
            Tool::Msmc => {
                for &n in &config.msmc_sample_sizes {
                    series.push(Series {
                        label: format!("{} n={} seed {}", tool.display_name(), n, seed),
                        table: layout.table(tool, seed, Some(n)),
                    });
                }
            }
            _ => series.push(Series {
                label: format!("{} seed {}", tool.display_name(), seed),
                table: layout.table(tool, seed, None),
            }),
        }
    }
    series
}

/// Reads one table; a missing or empty table is a plotting error.
pub fn load_curve(series: &Series) -> Result<Curve> {
    if !series.table.exists() {
        return Err(NeError::plotting(&series.table, "table is missing"));
    }

    let table = NeTable::read(&series.table)
        .map_err(|e| NeError::plotting(&series.table, e.to_string()))?;
    let points = table.log_points();
    if points.is_empty() {
        return Err(NeError::plotting(&series.table, "table has no plottable rows"));
    }

    Ok(Curve {
        label: series.label.clone(),
        points,
    })
}

/// Plots every replicate of one tool.
pub fn plot_tool(config: &RunConfig, tool: Tool, output: &Path) -> Result<()> {
    let curves = tool_series(config, tool)
        .iter()
        .map(load_curve)
        .collect::<Result<Vec<_>>>()?;

    let title =
        format!("{} estimates, {} {}", tool.display_name(), config.model, config.population);
    render(&title, &curves, config.truth.as_ref(), output)?;

    info!("Plotted {} {} series to {}", curves.len(), tool, output.display());
    Ok(())
}

/// Plots all tools' tables together.
pub fn plot_all(config: &RunConfig, output: &Path) -> Result<()> {
    let curves = Tool::ALL
        .iter()
        .flat_map(|&tool| tool_series(config, tool))
        .map(|s| load_curve(&s))
        .collect::<Result<Vec<_>>>()?;

    let title = format!("Ne(t) estimates, {} {}", config.model, config.population);
    render(&title, &curves, config.truth.as_ref(), output)?;

    info!("Plotted {} series to {}", curves.len(), output.display());
    Ok(())
}

/// Bounds over every curve, widened a little so lines don't touch the frame.
fn bounds(curves: &[Curve]) -> Option<((f64, f64), (f64, f64))> {
    let points = curves.iter().flat_map(|c| c.points.iter());

    let mut x = (f64::INFINITY, f64::NEG_INFINITY);
    let mut y = (f64::INFINITY, f64::NEG_INFINITY);
    for &(gen, ne) in points {
        x = (x.0.min(gen), x.1.max(gen));
        y = (y.0.min(ne), y.1.max(ne));
    }

    if !(x.0.is_finite() && y.0.is_finite()) {
        return None;
    }
    Some(((x.0 * 0.8, x.1 * 1.25), (y.0 * 0.8, y.1 * 1.25)))
}

fn render(title: &str, curves: &[Curve], truth: Option<&Population>, output: &Path) -> Result<()> {
    let ((x_min, x_max), (mut y_min, mut y_max)) =
        bounds(curves).ok_or_else(|| NeError::plotting(output, "nothing to plot"))?;

    let truth_points = truth
        .map(|p| p.truth_curve(x_min, x_max, TRUTH_POINTS))
        .unwrap_or_default();
    for &(_, ne) in &truth_points {
        y_min = y_min.min(ne * 0.8);
        y_max = y_max.max(ne * 1.25);
    }
    debug!(
        "Plot range: generations {:.3e}..{:.3e}, Ne {:.3e}..{:.3e}",
        x_min, x_max, y_min, y_max
    );

    draw(title, curves, &truth_points, (x_min..x_max, y_min..y_max), output)
        .map_err(|e| NeError::plotting(output, e.to_string()))
}

fn draw(
    title: &str,
    curves: &[Curve],
    truth: &[(f64, f64)],
    (x_range, y_range): (std::ops::Range<f64>, std::ops::Range<f64>),
    output: &Path,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let root = SVGBackend::new(output, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range.log_scale(), y_range.log_scale())?;

    chart
        .configure_mesh()
        .x_desc("generations before present")
        .y_desc("effective population size")
        .x_label_formatter(&|x| format!("{:.0e}", x))
        .y_label_formatter(&|y| format!("{:.0e}", y))
        .draw()?;

    for (i, curve) in curves.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(curve.points.iter().copied(), color.stroke_width(2)))?
            .label(curve.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    if !truth.is_empty() {
        chart
            .draw_series(LineSeries::new(truth.iter().copied(), BLACK.stroke_width(3)))?
            .label("truth")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}
