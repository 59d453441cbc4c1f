//! Rumbo de brújula a partir de dos ejes ortogonales del magnetómetro.

/// `atan2(y, x)` en grados, normalizado a `[0, 360)`.
///
/// `heading(0.0, 0.0)` devuelve 0: `atan2(0, 0)` está definido como 0 y no se
/// trata como error.
pub fn heading(x: f64, y: f64) -> f64 {
    let deg = y.atan2(x).to_degrees();
    if deg >= 0.0 {
        // y = -0.0 da -0.0
        return deg + 0.0;
    }
    let wrapped = deg + 360.0;
    // -1e-15 + 360.0 redondea a 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Formato del display en vivo: dos decimales y símbolo de grado
pub fn display_heading(degrees: f64) -> String {
    format!("{:.2}°", degrees)
}
