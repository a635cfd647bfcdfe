//! Small vector helpers over `[f64; 3]`

use cm_protocol::Vec3;

#[inline]
pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn scale(v: Vec3, s: f64) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

#[inline]
pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
pub fn length(v: Vec3) -> f64 {
    dot(v, v).sqrt()
}

#[inline]
pub fn normalize(v: Vec3) -> Vec3 {
    let len = length(v);
    if len <= f64::EPSILON {
        [0.0, 0.0, 0.0]
    } else {
        scale(v, 1.0 / len)
    }
}

#[inline]
pub fn triangle_normal(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    normalize(cross(sub(b, a), sub(c, a)))
}

/// Distance along the ray to a triangle (Möller-Trumbore), `None` on a miss
///
/// Hits behind the origin do not count. `dir` need not be normalized; the
/// result is in units of `dir`.
pub fn ray_triangle(origin: Vec3, dir: Vec3, tri: [Vec3; 3]) -> Option<f64> {
    const EPS: f64 = 1e-12;
    let [a, b, c] = tri;

    let edge1 = sub(b, a);
    let edge2 = sub(c, a);
    let h = cross(dir, edge2);
    let det = dot(edge1, h);
    if det.abs() < EPS {
        return None;
    }

    let inv = 1.0 / det;
    let s = sub(origin, a);
    let u = inv * dot(s, h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = cross(s, edge1);
    let v = inv * dot(dir, q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = inv * dot(edge2, q);
    (t > EPS).then_some(t)
}
