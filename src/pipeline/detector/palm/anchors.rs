//! SSD anchor layout of the MediaPipe palm detector (192x192 input).

use std::sync::OnceLock;

/// One output layer: feature map side length and anchors per cell.
struct Layer {
    grid: u32,
    anchors_per_cell: u32,
}

// Strides 8, 16, 16, 16 collapse into two grids once layers sharing a stride
// are merged.
const LAYERS: [Layer; 2] = [
    Layer {
        grid: 24,
        anchors_per_cell: 2,
    },
    Layer {
        grid: 12,
        anchors_per_cell: 6,
    },
];

pub const NUM_ANCHORS: usize = 24 * 24 * 2 + 12 * 12 * 6;

/// Normalized `[x_center, y_center]` of every anchor, in model output order.
pub fn anchors() -> &'static [[f32; 2]] {
    static ANCHORS: OnceLock<Vec<[f32; 2]>> = OnceLock::new();
    ANCHORS.get_or_init(|| {
        let mut out = Vec::with_capacity(NUM_ANCHORS);
        for layer in &LAYERS {
            for y in 0..layer.grid {
                for x in 0..layer.grid {
                    let center = [
                        (x as f32 + 0.5) / layer.grid as f32,
                        (y as f32 + 0.5) / layer.grid as f32,
                    ];
                    for _ in 0..layer.anchors_per_cell {
                        out.push(center);
                    }
                }
            }
        }
        out
    })
}
