use std::collections::BTreeMap;

use crate::error::{ExtractError, Result};
use crate::instance_map::InstanceMap;

/// Half-open bounding box, `max_*` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_row: u32,
    pub min_col: u32,
    pub max_row: u32,
    pub max_col: u32,
}

impl BoundingBox {
    pub fn height(&self) -> u32 {
        self.max_row - self.min_row
    }

    pub fn width(&self) -> u32 {
        self.max_col - self.min_col
    }
}

/// Per-instance descriptors derived from an instance map.
///
/// Instances are reported in ascending label order, skipping background (0).
#[derive(Debug, Clone)]
pub struct RegionProperties {
    pub label: u32,
    pub area: f64,
    pub convex_area: f64,
    pub eccentricity: f64,
    pub equivalent_diameter: f64,
    pub euler_number: f64,
    pub extent: f64,
    pub filled_area: f64,
    pub major_axis_length: f64,
    pub minor_axis_length: f64,
    pub orientation: f64,
    pub perimeter: f64,
    pub solidity: f64,
    /// (row, col), guaranteed to lie within `bbox`.
    pub centroid: (f64, f64),
    pub bbox: BoundingBox,
}

struct Accumulator {
    pixels: Vec<(u32, u32)>,
    min_row: u32,
    min_col: u32,
    max_row: u32,
    max_col: u32,
}

/// Computes region properties for every nonzero label of the map.
pub fn region_properties(map: &InstanceMap) -> Result<Vec<RegionProperties>> {
    let mut accs: BTreeMap<u32, Accumulator> = BTreeMap::new();
    for row in 0..map.height() {
        for col in 0..map.width() {
            let label = map.label_at(row, col);
            if label == 0 {
                continue;
            }
            let acc = accs.entry(label).or_insert(Accumulator {
                pixels: Vec::new(),
                min_row: row,
                min_col: col,
                max_row: row + 1,
                max_col: col + 1,
            });
            acc.pixels.push((row, col));
            acc.min_row = acc.min_row.min(row);
            acc.min_col = acc.min_col.min(col);
            acc.max_row = acc.max_row.max(row + 1);
            acc.max_col = acc.max_col.max(col + 1);
        }
    }

    let mut regions = Vec::with_capacity(accs.len());
    for (label, acc) in accs {
        regions.push(compute_region(map, label, &acc)?);
    }
    Ok(regions)
}

fn compute_region(map: &InstanceMap, label: u32, acc: &Accumulator) -> Result<RegionProperties> {
    let bbox = BoundingBox {
        min_row: acc.min_row,
        min_col: acc.min_col,
        max_row: acc.max_row,
        max_col: acc.max_col,
    };
    let n = acc.pixels.len() as f64;
    let area = n;

    let (mut sum_r, mut sum_c) = (0.0f64, 0.0f64);
    for &(r, c) in &acc.pixels {
        sum_r += r as f64;
        sum_c += c as f64;
    }
    let centroid = (sum_r / n, sum_c / n);

    // Second central moments, normalized by area.
    let (mut mu_rr, mut mu_cc, mut mu_rc) = (0.0f64, 0.0f64, 0.0f64);
    for &(r, c) in &acc.pixels {
        let dr = r as f64 - centroid.0;
        let dc = c as f64 - centroid.1;
        mu_rr += dr * dr;
        mu_cc += dc * dc;
        mu_rc += dr * dc;
    }
    mu_rr /= n;
    mu_cc /= n;
    mu_rc /= n;

    let common = ((mu_rr - mu_cc).powi(2) + 4.0 * mu_rc * mu_rc).sqrt();
    let l1 = (mu_rr + mu_cc + common) / 2.0;
    let l2 = (mu_rr + mu_cc - common) / 2.0;
    let major_axis_length = 4.0 * l1.max(0.0).sqrt();
    let minor_axis_length = 4.0 * l2.max(0.0).sqrt();
    let eccentricity = if l1 > 0.0 {
        (1.0 - l2 / l1).max(0.0).sqrt()
    } else {
        0.0
    };
    // Angle between the row axis and the major axis, in (-pi/2, pi/2].
    let orientation = 0.5 * (2.0 * mu_rc).atan2(mu_rr - mu_cc);

    let grid = LocalGrid::new(map, label, &bbox);
    let perimeter = grid.perimeter();
    let (components, holes, hole_pixels) = grid.topology();
    let euler_number = components as f64 - holes as f64;
    let filled_area = area + hole_pixels as f64;

    let convex_area = grid.convex_area();
    let extent = area / (bbox.height() as f64 * bbox.width() as f64);
    let equivalent_diameter = (4.0 * area / std::f64::consts::PI).sqrt();
    let solidity = if convex_area > 0.0 {
        area / convex_area
    } else {
        1.0
    };

    let region = RegionProperties {
        label,
        area,
        convex_area,
        eccentricity,
        equivalent_diameter,
        euler_number,
        extent,
        filled_area,
        major_axis_length,
        minor_axis_length,
        orientation,
        perimeter,
        solidity,
        centroid,
        bbox,
    };
    validate_region(&region, map)?;
    Ok(region)
}

fn validate_region(region: &RegionProperties, map: &InstanceMap) -> Result<()> {
    let (cr, cc) = region.centroid;
    let b = &region.bbox;
    let centroid_inside = cr >= b.min_row as f64
        && cr <= (b.max_row - 1) as f64
        && cc >= b.min_col as f64
        && cc <= (b.max_col - 1) as f64;
    let bbox_inside = b.max_row <= map.height() && b.max_col <= map.width();
    if !centroid_inside || !bbox_inside {
        return Err(ExtractError::DataIntegrity(format!(
            "region {} violates the centroid/bbox invariant (centroid {:?}, bbox {:?})",
            region.label, region.centroid, region.bbox
        )));
    }
    Ok(())
}

/// Binary view of one instance restricted to its bounding box.
struct LocalGrid {
    height: usize,
    width: usize,
    inside: Vec<bool>,
}

impl LocalGrid {
    fn new(map: &InstanceMap, label: u32, bbox: &BoundingBox) -> Self {
        let height = bbox.height() as usize;
        let width = bbox.width() as usize;
        let mut inside = vec![false; height * width];
        for r in 0..height {
            for c in 0..width {
                inside[r * width + c] =
                    map.label_at(bbox.min_row + r as u32, bbox.min_col + c as u32) == label;
            }
        }
        Self {
            height,
            width,
            inside,
        }
    }

    #[inline]
    fn at(&self, r: usize, c: usize) -> bool {
        self.inside[r * self.width + c]
    }

    fn border(&self, r: usize, c: usize) -> bool {
        self.at(r, c)
            && (r == 0
                || c == 0
                || r + 1 == self.height
                || c + 1 == self.width
                || !self.at(r - 1, c)
                || !self.at(r + 1, c)
                || !self.at(r, c - 1)
                || !self.at(r, c + 1))
    }

    /// Contour length estimate over the 4-connected border, weighting each
    /// border pixel by its local configuration (straight runs count 1,
    /// diagonal steps sqrt(2), corners the average of both).
    fn perimeter(&self) -> f64 {
        let sqrt2 = std::f64::consts::SQRT_2;
        let mut total = 0.0f64;
        for r in 0..self.height {
            for c in 0..self.width {
                if !self.border(r, c) {
                    continue;
                }
                let mut axial = 0u32;
                let mut diagonal = 0u32;
                for (dr, dc) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                    let (nr, nc) = (r as i64 + dr, c as i64 + dc);
                    if nr >= 0
                        && nc >= 0
                        && (nr as usize) < self.height
                        && (nc as usize) < self.width
                        && self.border(nr as usize, nc as usize)
                    {
                        axial += 1;
                    }
                }
                for (dr, dc) in [(-1i64, -1i64), (-1, 1), (1, -1), (1, 1)] {
                    let (nr, nc) = (r as i64 + dr, c as i64 + dc);
                    if nr >= 0
                        && nc >= 0
                        && (nr as usize) < self.height
                        && (nc as usize) < self.width
                        && self.border(nr as usize, nc as usize)
                    {
                        diagonal += 1;
                    }
                }
                total += match 1 + 2 * axial + 10 * diagonal {
                    5 | 7 | 15 | 17 | 25 | 27 => 1.0,
                    21 | 33 => sqrt2,
                    13 | 23 => (1.0 + sqrt2) / 2.0,
                    _ => 0.0,
                };
            }
        }
        total
    }

    fn flood(&self, seed: usize, target: bool, visited: &mut [bool]) -> usize {
        let mut stack = vec![seed];
        visited[seed] = true;
        let mut count = 0;
        while let Some(idx) = stack.pop() {
            count += 1;
            let (r, c) = (idx / self.width, idx % self.width);
            let mut push = |nr: usize, nc: usize, stack: &mut Vec<usize>, visited: &mut [bool]| {
                let nidx = nr * self.width + nc;
                if !visited[nidx] && self.inside[nidx] == target {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            };
            if r > 0 {
                push(r - 1, c, &mut stack, visited);
            }
            if r + 1 < self.height {
                push(r + 1, c, &mut stack, visited);
            }
            if c > 0 {
                push(r, c - 1, &mut stack, visited);
            }
            if c + 1 < self.width {
                push(r, c + 1, &mut stack, visited);
            }
        }
        count
    }

    /// (connected components, holes, hole pixel count), 4-connectivity for
    /// both foreground and enclosed background.
    fn topology(&self) -> (usize, usize, usize) {
        let mut visited = vec![false; self.inside.len()];

        let mut components = 0;
        for idx in 0..self.inside.len() {
            if self.inside[idx] && !visited[idx] {
                components += 1;
                self.flood(idx, true, &mut visited);
            }
        }

        // Background reachable from the bbox border is not a hole.
        let mut bg_visited = vec![false; self.inside.len()];
        for r in 0..self.height {
            for c in 0..self.width {
                let border = r == 0 || c == 0 || r + 1 == self.height || c + 1 == self.width;
                let idx = r * self.width + c;
                if border && !self.inside[idx] && !bg_visited[idx] {
                    self.flood(idx, false, &mut bg_visited);
                }
            }
        }
        let mut holes = 0;
        let mut hole_pixels = 0;
        for idx in 0..self.inside.len() {
            if !self.inside[idx] && !bg_visited[idx] {
                holes += 1;
                hole_pixels += self.flood(idx, false, &mut bg_visited);
            }
        }
        (components, holes, hole_pixels)
    }

    /// Pixel count of the rasterized convex hull of the instance.
    fn convex_area(&self) -> f64 {
        let mut points = Vec::new();
        for r in 0..self.height {
            for c in 0..self.width {
                if self.at(r, c) {
                    let exposed = r == 0
                        || c == 0
                        || r + 1 == self.height
                        || c + 1 == self.width
                        || !self.at(r - 1, c)
                        || !self.at(r + 1, c)
                        || !self.at(r, c - 1)
                        || !self.at(r, c + 1);
                    if exposed {
                        points.push((c as f64, r as f64));
                    }
                }
            }
        }
        if points.len() < 3 {
            return points.len() as f64;
        }
        let hull = convex_hull(&mut points);
        if hull.len() < 3 {
            // Degenerate (collinear) instance: the hull is the pixel set itself.
            return points.len() as f64;
        }
        let mut count = 0u64;
        for r in 0..self.height {
            for c in 0..self.width {
                if point_in_convex_polygon(c as f64, r as f64, &hull) {
                    count += 1;
                }
            }
        }
        count as f64
    }
}

/// Andrew's monotone chain over (x, y) points, counter-clockwise hull.
fn convex_hull(points: &mut Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.partial_cmp(b).unwrap());
    points.dedup();
    if points.len() < 3 {
        return points.clone();
    }
    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };
    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(points.len() * 2);
    for &p in points.iter() {
        while hull.len() > 1 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev() {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

fn point_in_convex_polygon(x: f64, y: f64, hull: &[(f64, f64)]) -> bool {
    if hull.len() < 3 {
        return hull.iter().any(|&(hx, hy)| hx == x && hy == y);
    }
    const EPS: f64 = 1e-9;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let cross = (b.0 - a.0) * (y - a.1) - (b.1 - a.1) * (x - a.0);
        if cross < -EPS {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_map() -> InstanceMap {
        // 8x8 with a 4x4 square of label 1 at rows 2..6, cols 2..6.
        let mut labels = vec![0u32; 64];
        for r in 2..6 {
            for c in 2..6 {
                labels[r * 8 + c] = 1;
            }
        }
        InstanceMap::new(8, 8, labels).unwrap()
    }

    #[test]
    fn one_region_per_nonzero_label() {
        let mut labels = vec![0u32; 36];
        labels[7] = 4;
        labels[8] = 4;
        labels[20] = 9;
        let map = InstanceMap::new(6, 6, labels).unwrap();
        let regions = region_properties(&map).unwrap();
        assert_eq!(regions.len(), map.labels().len());
        assert_eq!(regions[0].label, 4);
        assert_eq!(regions[1].label, 9);
    }

    #[test]
    fn square_region_descriptors() {
        let regions = region_properties(&square_map()).unwrap();
        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert_eq!(r.area, 16.0);
        assert_eq!(r.convex_area, 16.0);
        assert_eq!(r.filled_area, 16.0);
        assert_eq!(r.euler_number, 1.0);
        assert_eq!(r.extent, 1.0);
        assert_eq!(r.solidity, 1.0);
        // Weighted border count: all 12 ring pixels sit on straight runs.
        assert_eq!(r.perimeter, 12.0);
        assert_eq!(r.centroid, (3.5, 3.5));
        assert_eq!(
            r.bbox,
            BoundingBox {
                min_row: 2,
                min_col: 2,
                max_row: 6,
                max_col: 6
            }
        );
        // A square has no preferred axis.
        assert!((r.major_axis_length - r.minor_axis_length).abs() < 1e-9);
        assert!(r.eccentricity.abs() < 1e-9);
        assert!((r.equivalent_diameter - (64.0 / std::f64::consts::PI).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn ring_has_one_hole() {
        // 5x5 ring: 3x3 square with the center removed.
        let mut labels = vec![0u32; 25];
        for r in 1..4 {
            for c in 1..4 {
                labels[r * 5 + c] = 2;
            }
        }
        labels[2 * 5 + 2] = 0;
        let map = InstanceMap::new(5, 5, labels).unwrap();
        let r = &region_properties(&map).unwrap()[0];
        assert_eq!(r.area, 8.0);
        assert_eq!(r.euler_number, 0.0);
        assert_eq!(r.filled_area, 9.0);
    }

    #[test]
    fn horizontal_bar_major_axis() {
        let mut labels = vec![0u32; 8 * 8];
        for c in 1..7 {
            labels[3 * 8 + c] = 1;
        }
        let map = InstanceMap::new(8, 8, labels).unwrap();
        let r = &region_properties(&map).unwrap()[0];
        assert!(r.major_axis_length > r.minor_axis_length);
        assert!(r.eccentricity > 0.9);
        // Orientation is measured from the row axis, so a bar along the
        // columns sits at pi/2.
        assert!((r.orientation - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn vertical_bar_orientation() {
        let mut labels = vec![0u32; 8 * 8];
        for r in 1..7 {
            labels[r * 8 + 3] = 1;
        }
        let map = InstanceMap::new(8, 8, labels).unwrap();
        let r = &region_properties(&map).unwrap()[0];
        // A bar along the rows is aligned with the reference axis.
        assert!(r.orientation.abs() < 1e-9);
    }

    #[test]
    fn diagonal_staircase_perimeter_uses_sqrt2_steps() {
        // 4-connected staircase: (r, r) and (r, r + 1) for r in 0..4.
        let mut labels = vec![0u32; 8 * 8];
        for r in 0..4 {
            labels[r * 8 + r] = 1;
            labels[r * 8 + r + 1] = 1;
        }
        let map = InstanceMap::new(8, 8, labels).unwrap();
        let r = &region_properties(&map).unwrap()[0];
        // Six pixels on straight or crossing runs count 1, the two step ends
        // are corner-weighted at (1 + sqrt(2)) / 2.
        let expected = 6.0 + 1.0 + std::f64::consts::SQRT_2;
        assert!((r.perimeter - expected).abs() < 1e-9);
    }
}
