/// Floor reported for silence/empty buffers.
pub(crate) const METER_FLOOR_DB: f32 = -60.0;

/// RMS energy of a frame expressed in dBFS.
pub fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return METER_FLOOR_DB;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt().max(1e-6);
    20.0 * rms.log10()
}
