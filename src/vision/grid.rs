// src/vision/grid.rs
// module: vision | role: launcher grid detector
// summary: the non-texted, launcher-grid-specific strategy of SPEC_FULL.md
// §4.2 step 4: Hough circle detection over navigation-bar candidate regions,
// hand-rolled DBSCAN clustering of the detected centers, and a uniformity
// check against a 3x3 pattern. Grounded on
// original_source/backend/tools/non_texted_icon_detection.py, which pipes
// `cv2.HoughCircles` output through `sklearn.cluster.DBSCAN`; neither OpenCV
// nor a clustering crate appears in the reference stack, so Hough detection
// is done via `imageproc` (the reference corpus's own CV crate) and DBSCAN is
// owned directly as a short, self-contained routine.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;

/// One detected circular dot, in image-pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Circle {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// A candidate region of the screen to search for a launcher-grid dot row,
/// each covering 15% of the screen along its edge (SPEC_FULL.md §4.2 step 4).
#[derive(Debug, Clone, Copy)]
pub enum NavBarRegion {
    Bottom,
    Top,
    Left,
    Right,
}

impl NavBarRegion {
    /// Returns `(x, y, width, height)` of this region within a `width x height` screen.
    pub fn bounds(self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let band_h = ((height as f32) * 0.15) as u32;
        let band_w = ((width as f32) * 0.15) as u32;
        match self {
            NavBarRegion::Bottom => (0, height.saturating_sub(band_h), width, band_h),
            NavBarRegion::Top => (0, 0, width, band_h),
            NavBarRegion::Left => (0, 0, band_w, height),
            NavBarRegion::Right => (width.saturating_sub(band_w), 0, band_w, height),
        }
    }

    pub fn all() -> [NavBarRegion; 4] {
        [
            NavBarRegion::Bottom,
            NavBarRegion::Top,
            NavBarRegion::Left,
            NavBarRegion::Right,
        ]
    }
}

/// The outcome of a successful grid detection: the cluster's centroid and its
/// uniformity score.
#[derive(Debug, Clone, Copy)]
pub struct GridDetection {
    pub centroid_x: f32,
    pub centroid_y: f32,
    pub confidence: u8,
}

/// Runs Canny edge detection then a Hough circle search over `region`, and
/// returns the detected circle centers.
pub fn detect_circles(gray: &GrayImage) -> Vec<Circle> {
    let edges = canny(gray, 30.0, 90.0);
    hough_circles(&edges, 4.0, 20.0)
}

/// A compact Hough circle transform: votes in a 3D (x, y, r) accumulator for
/// every edge pixel, over the given radius range, then extracts local maxima.
fn hough_circles(edges: &GrayImage, min_radius: f32, max_radius: f32) -> Vec<Circle> {
    let (w, h) = edges.dimensions();
    let edge_points: Vec<(f32, f32)> = edges
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();

    if edge_points.is_empty() {
        return Vec::new();
    }

    let radius_steps = 6;
    let radius_step = (max_radius - min_radius) / radius_steps as f32;
    let mut best_by_cell: std::collections::HashMap<(i32, i32), (f32, u32)> = std::collections::HashMap::new();
    let cell_size = 6i32;

    for r_idx in 0..=radius_steps {
        let radius = min_radius + radius_step * r_idx as f32;
        let angle_steps = 16;

        let mut votes: std::collections::HashMap<(i32, i32), u32> = std::collections::HashMap::new();
        for &(ex, ey) in &edge_points {
            for a in 0..angle_steps {
                let theta = (a as f32 / angle_steps as f32) * std::f32::consts::TAU;
                let cx = ex - radius * theta.cos();
                let cy = ey - radius * theta.sin();
                if cx < 0.0 || cy < 0.0 || cx >= w as f32 || cy >= h as f32 {
                    continue;
                }
                let cell = ((cx as i32) / cell_size, (cy as i32) / cell_size);
                *votes.entry(cell).or_insert(0) += 1;
            }
        }

        for (cell, count) in votes {
            if count < 6 {
                continue;
            }
            let entry = best_by_cell.entry(cell).or_insert((radius, count));
            if count > entry.1 {
                *entry = (radius, count);
            }
        }
    }

    best_by_cell
        .into_iter()
        .map(|((cx, cy), (radius, _))| Circle {
            x: (cx * cell_size) as f32 + cell_size as f32 / 2.0,
            y: (cy * cell_size) as f32 + cell_size as f32 / 2.0,
            radius,
        })
        .collect()
}

/// Density-based clustering over circle centers. `eps` is the neighborhood
/// radius, `min_points` the minimum cluster size, mirroring
/// `sklearn.cluster.DBSCAN(eps=..., min_samples=...)` in the Python original.
pub fn dbscan(points: &[Circle], eps: f32, min_points: usize) -> Vec<Vec<usize>> {
    let n = points.len();
    let mut visited = vec![false; n];
    let mut assigned = vec![false; n];
    let mut clusters = Vec::new();

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let mut neighbors = region_query(points, i, eps);
        if neighbors.len() < min_points {
            continue;
        }

        let mut cluster = Vec::new();
        cluster.push(i);
        assigned[i] = true;

        let mut idx = 0;
        while idx < neighbors.len() {
            let j = neighbors[idx];
            if !visited[j] {
                visited[j] = true;
                let j_neighbors = region_query(points, j, eps);
                if j_neighbors.len() >= min_points {
                    for nb in j_neighbors {
                        if !neighbors.contains(&nb) {
                            neighbors.push(nb);
                        }
                    }
                }
            }
            if !assigned[j] {
                assigned[j] = true;
                cluster.push(j);
            }
            idx += 1;
        }

        clusters.push(cluster);
    }

    clusters
}

fn region_query(points: &[Circle], i: usize, eps: f32) -> Vec<usize> {
    let p = points[i];
    points
        .iter()
        .enumerate()
        .filter(|(_, q)| {
            let dx = q.x - p.x;
            let dy = q.y - p.y;
            (dx * dx + dy * dy).sqrt() <= eps
        })
        .map(|(idx, _)| idx)
        .collect()
}

/// Whether a cluster's radius distribution is uniform enough to plausibly be
/// a 3x3 icon grid (SPEC_FULL.md §4.2 step 4: uniformity >= 0.5 on
/// stddev/mean of radius).
pub fn is_uniform_grid(cluster: &[Circle]) -> bool {
    if cluster.len() < 4 {
        return false;
    }

    let mean = cluster.iter().map(|c| c.radius).sum::<f32>() / cluster.len() as f32;
    if mean == 0.0 {
        return false;
    }

    let variance = cluster.iter().map(|c| (c.radius - mean).powi(2)).sum::<f32>() / cluster.len() as f32;
    let stddev = variance.sqrt();
    let uniformity = 1.0 - (stddev / mean).min(1.0);

    uniformity >= 0.5
}

fn centroid(cluster: &[Circle]) -> (f32, f32) {
    let n = cluster.len() as f32;
    let sx: f32 = cluster.iter().map(|c| c.x).sum();
    let sy: f32 = cluster.iter().map(|c| c.y).sum();
    (sx / n, sy / n)
}

/// Full grid-detector pass over one region: detect circles, cluster, and
/// report the first uniform cluster found.
pub fn detect_grid(gray: &GrayImage) -> Option<GridDetection> {
    let circles = detect_circles(gray);
    if circles.is_empty() {
        return None;
    }

    let clusters = dbscan(&circles, 40.0, 4);
    for cluster_indices in &clusters {
        let cluster: Vec<Circle> = cluster_indices.iter().map(|&i| circles[i]).collect();
        if is_uniform_grid(&cluster) {
            let (cx, cy) = centroid(&cluster);
            return Some(GridDetection {
                centroid_x: cx,
                centroid_y: cy,
                confidence: 75,
            });
        }
    }

    None
}

#[allow(dead_code)]
fn morphological_noise_floor(gray: &GrayImage) -> GrayImage {
    // Kept as a documented extension point: a dilation pass can suppress
    // spurious single-pixel edges before Hough voting, at extra cost.
    imageproc::morphology::dilate(gray, Norm::LInf, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(cx: i32, cy: i32, r: i32, points: usize) -> Vec<Circle> {
        (0..points)
            .map(|i| {
                let theta = (i as f32 / points as f32) * std::f32::consts::TAU;
                Circle {
                    x: cx as f32 + r as f32 * theta.cos(),
                    y: cy as f32 + r as f32 * theta.sin(),
                    radius: r as f32,
                }
            })
            .collect()
    }

    #[test]
    fn dbscan_groups_nearby_points_and_ignores_outliers() {
        let mut points = ring(50, 50, 4, 6);
        points.push(Circle { x: 400.0, y: 400.0, radius: 5.0 });

        let clusters = dbscan(&points, 20.0, 4);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 6);
    }

    #[test]
    fn uniform_radii_pass_uniformity_check() {
        let cluster: Vec<Circle> = (0..9)
            .map(|i| Circle { x: i as f32 * 10.0, y: 0.0, radius: 10.0 })
            .collect();
        assert!(is_uniform_grid(&cluster));
    }

    #[test]
    fn wildly_varying_radii_fail_uniformity_check() {
        let cluster = vec![
            Circle { x: 0.0, y: 0.0, radius: 2.0 },
            Circle { x: 10.0, y: 0.0, radius: 40.0 },
            Circle { x: 20.0, y: 0.0, radius: 5.0 },
            Circle { x: 30.0, y: 0.0, radius: 60.0 },
        ];
        assert!(!is_uniform_grid(&cluster));
    }

    #[test]
    fn nav_bar_region_bounds_are_proportional() {
        let (x, y, w, h) = NavBarRegion::Bottom.bounds(1000, 2000);
        assert_eq!(x, 0);
        assert_eq!(w, 1000);
        assert_eq!(h, 300);
        assert_eq!(y, 1700);
    }
}
