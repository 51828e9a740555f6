//! Assemble detected chessboard corners into an ordered `cols x rows` grid.
//!
//! The two grid axes are estimated from nearest-neighbour directions, each
//! corner keeps at most one mutual neighbour per axis direction and a BFS
//! assigns integer lattice coordinates. A component that fills the lattice
//! exactly is re-indexed into a canonical order.

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    /// Nearest neighbours inspected per corner.
    pub k_neighbors: usize,
    /// Maximum angle between an edge and the grid axis it is assigned to.
    pub axis_tolerance_deg: f32,
    /// Maximum edge length relative to the corner's nearest-neighbour distance.
    pub max_step_ratio: f32,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            k_neighbors: 8,
            axis_tolerance_deg: 25.0,
            max_step_ratio: 1.8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    fn opposite(self) -> Self {
        match self {
            Self::Right => Self::Left,
            Self::Left => Self::Right,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    fn step(self) -> (i32, i32) {
        match self {
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Down => (0, 1),
        }
    }
}

#[derive(Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

/// Dominant pair of grid axes, `[u, v]`, with `v` rotated +90° from `u`.
///
/// Nearest-neighbour directions cluster around two roughly orthogonal lines,
/// so their angles are averaged modulo π/2.
fn grid_axes(points: &[Point2<f32>], tree: &KdTree<f32, 2>) -> Option<[Vector2<f32>; 2]> {
    let (mut c, mut s) = (0.0f32, 0.0f32);
    for (i, p) in points.iter().enumerate() {
        let nearest = tree
            .nearest_n::<SquaredEuclidean>(&[p.x, p.y], 2)
            .into_iter()
            .find(|nn| nn.item as usize != i)?;
        let e = points[nearest.item as usize] - p;
        let theta = e.y.atan2(e.x);
        c += (4.0 * theta).cos();
        s += (4.0 * theta).sin();
    }
    if c.hypot(s) < 1e-3 * points.len() as f32 {
        return None;
    }
    let theta0 = s.atan2(c) / 4.0;
    let u = Vector2::new(theta0.cos(), theta0.sin());
    let v = Vector2::new(-u.y, u.x);
    Some([u, v])
}

fn nearest_distance(tree: &KdTree<f32, 2>, points: &[Point2<f32>], i: usize) -> Option<f32> {
    let p = points[i];
    tree.nearest_n::<SquaredEuclidean>(&[p.x, p.y], 2)
        .into_iter()
        .find(|nn| nn.item as usize != i)
        .map(|nn| nn.distance.sqrt())
}

fn classify_edge(
    e: &Vector2<f32>,
    axes: &[Vector2<f32>; 2],
    cos_tol: f32,
) -> Option<(NeighborDirection, f32)> {
    let distance = e.norm();
    if distance <= f32::EPSILON {
        return None;
    }
    let dir = e / distance;
    let du = dir.dot(&axes[0]);
    let dv = dir.dot(&axes[1]);

    if du.abs() >= cos_tol {
        let direction = if du > 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        };
        Some((direction, 1.0 - du.abs()))
    } else if dv.abs() >= cos_tol {
        let direction = if dv > 0.0 {
            NeighborDirection::Down
        } else {
            NeighborDirection::Up
        };
        Some((direction, 1.0 - dv.abs()))
    } else {
        None
    }
}

/// Keep at most one neighbor per direction, choosing the lowest-score candidate.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates {
        let slot = match candidate.direction {
            NeighborDirection::Right => &mut best[0],
            NeighborDirection::Left => &mut best[1],
            NeighborDirection::Up => &mut best[2],
            NeighborDirection::Down => &mut best[3],
        };

        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };

        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    /// Build the neighbour graph; `None` when the axes cannot be estimated.
    pub fn new(points: &[Point2<f32>], params: &GridParams) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let coords = points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let axes = grid_axes(points, &tree)?;
        let cos_tol = params.axis_tolerance_deg.to_radians().cos();

        let mut neighbors = Vec::with_capacity(points.len());
        for (i, p) in points.iter().enumerate() {
            let Some(nearest) = nearest_distance(&tree, points, i) else {
                neighbors.push(Vec::new());
                continue;
            };
            let max_distance = nearest * params.max_step_ratio;

            let mut candidates = Vec::new();
            let results = tree.nearest_n::<SquaredEuclidean>(&[p.x, p.y], params.k_neighbors + 1);
            for nn in results {
                let j = nn.item as usize;
                if j == i {
                    continue;
                }
                let e = points[j] - p;
                let distance = e.norm();
                if distance > max_distance {
                    continue;
                }
                if let Some((direction, misalignment)) = classify_edge(&e, &axes, cos_tol) {
                    candidates.push(NodeNeighbor {
                        direction,
                        index: j,
                        distance,
                        // Nearest aligned corner wins; misalignment breaks ties.
                        score: distance / nearest + misalignment,
                    });
                }
            }
            neighbors.push(select_neighbors(candidates));
        }

        // Keep only edges both endpoints agree on.
        let mutual: Vec<Vec<NodeNeighbor>> = neighbors
            .iter()
            .enumerate()
            .map(|(i, list)| {
                list.iter()
                    .filter(|n| {
                        neighbors[n.index]
                            .iter()
                            .any(|back| back.index == i && back.direction == n.direction.opposite())
                    })
                    .map(|n| NodeNeighbor {
                        direction: n.direction,
                        index: n.index,
                        distance: n.distance,
                        score: n.score,
                    })
                    .collect()
            })
            .collect();

        Some(Self { neighbors: mutual })
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);

            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        components.push(component);
    }

    components
}

/// BFS lattice coordinates `(node, i, j)` for one component.
///
/// Returns `None` if the component is not a consistent lattice, i.e. a node
/// is reached with two different coordinates or two nodes share one.
pub fn assign_grid_coordinates(
    graph: &GridGraph,
    component: &[usize],
) -> Option<Vec<(usize, i32, i32)>> {
    let start = *component.first()?;
    let mut assigned: Vec<Option<(i32, i32)>> = vec![None; graph.neighbors.len()];
    let mut coords = Vec::with_capacity(component.len());
    let mut taken = std::collections::HashSet::new();
    let mut queue = VecDeque::new();

    assigned[start] = Some((0, 0));
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        let (i, j) = assigned[node]?;
        if !taken.insert((i, j)) {
            return None;
        }
        coords.push((node, i, j));

        for neighbor in &graph.neighbors[node] {
            let (di, dj) = neighbor.direction.step();
            let expected = (i + di, j + dj);
            match assigned[neighbor.index] {
                Some(existing) if existing != expected => return None,
                Some(_) => {}
                None => {
                    assigned[neighbor.index] = Some(expected);
                    queue.push_back(neighbor.index);
                }
            }
        }
    }

    Some(coords)
}

/// Sum of node indices over a `w x h` window, `None` if any cell is empty.
///
/// Nodes are ranked strongest first, so a lower sum is a stronger window.
fn window_score(
    cells: &[Option<usize>],
    width: usize,
    origin: (usize, usize),
    shape: (usize, usize),
) -> Option<usize> {
    let mut score = 0;
    for j in origin.1..origin.1 + shape.1 {
        for i in origin.0..origin.0 + shape.0 {
            score += cells[j * width + i]?;
        }
    }
    Some(score)
}

/// Re-index a lattice into `cols x rows`, row-major.
///
/// A lattice larger than the board (weak border responses joining the
/// graph) is cut down to its strongest fully populated window. Among the
/// symmetries of that window that yield the requested shape, the one whose
/// first corner is closest to the image top-left wins, with ties broken in
/// favour of the first row running rightwards.
fn canonical_order(
    lattice: &[(usize, i32, i32)],
    points: &[Point2<f32>],
    cols: usize,
    rows: usize,
) -> Option<Vec<Point2<f32>>> {
    let min_i = lattice.iter().map(|c| c.1).min()?;
    let max_i = lattice.iter().map(|c| c.1).max()?;
    let min_j = lattice.iter().map(|c| c.2).min()?;
    let max_j = lattice.iter().map(|c| c.2).max()?;
    let width = (max_i - min_i + 1) as usize;
    let height = (max_j - min_j + 1) as usize;

    let mut cells = vec![None; width * height];
    for &(node, i, j) in lattice {
        let cell = (j - min_j) as usize * width + (i - min_i) as usize;
        if cells[cell].replace(node).is_some() {
            return None;
        }
    }

    let mut window: Option<(usize, (usize, usize), (usize, usize))> = None;
    for shape in [(cols, rows), (rows, cols)] {
        if shape.0 > width || shape.1 > height {
            continue;
        }
        for j0 in 0..=height - shape.1 {
            for i0 in 0..=width - shape.0 {
                let Some(score) = window_score(&cells, width, (i0, j0), shape) else {
                    continue;
                };
                if window.is_none_or(|(best, _, _)| score < best) {
                    window = Some((score, (i0, j0), shape));
                }
            }
        }
    }
    let (_, (i0, j0), (width_w, height_w)) = window?;
    let mut sub = Vec::with_capacity(width_w * height_w);
    for j in j0..j0 + height_w {
        for i in i0..i0 + width_w {
            sub.push(points[cells[j * width + i]?]);
        }
    }
    let (width, height, cells) = (width_w, height_w, sub);

    let mut best: Option<((f32, f32), Vec<Point2<f32>>)> = None;
    for transpose in [false, true] {
        let shape = if transpose {
            (height, width)
        } else {
            (width, height)
        };
        if shape != (cols, rows) {
            continue;
        }
        for flip_i in [false, true] {
            for flip_j in [false, true] {
                let mut ordered = Vec::with_capacity(cols * rows);
                for b in 0..rows {
                    for a in 0..cols {
                        let a1 = if flip_i { cols - 1 - a } else { a };
                        let b1 = if flip_j { rows - 1 - b } else { b };
                        let (i, j) = if transpose { (b1, a1) } else { (a1, b1) };
                        ordered.push(cells[j * width + i]);
                    }
                }
                let origin = ordered[0];
                let step = ordered[1] - ordered[0];
                let key = (origin.x + origin.y, -step.x);
                let better = match &best {
                    None => true,
                    Some((k, _)) => {
                        key.0 < k.0 - 1.0 || ((key.0 - k.0).abs() <= 1.0 && key.1 < k.1)
                    }
                };
                if better {
                    best = Some((key, ordered));
                }
            }
        }
    }

    best.map(|(_, ordered)| ordered)
}

/// Find `cols x rows` corners forming a grid and return them in row-major
/// order.
///
/// `points` must be sorted strongest first.
pub fn assemble_grid(
    points: &[Point2<f32>],
    cols: usize,
    rows: usize,
    params: &GridParams,
) -> Option<Vec<Point2<f32>>> {
    let expected = cols * rows;
    if cols < 2 || rows < 2 || points.len() < expected {
        return None;
    }

    let graph = GridGraph::new(points, params)?;
    let mut components = connected_components(&graph);
    components.retain(|c| c.len() >= expected);
    components.sort_by_key(|c| c.iter().copied().min().unwrap_or(usize::MAX));

    components.iter().find_map(|component| {
        let lattice = assign_grid_coordinates(&graph, component)?;
        canonical_order(&lattice, points, cols, rows)
    })
}
