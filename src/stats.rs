//! Sequence-axis statistics and adaptive instance normalisation.
//!
//! Statistics are computed over the second-to-last axis (the token axis of a
//! `[batch, seq, features]` or `[batch, heads, seq, features]` tensor) and
//! keep that axis with size one so they broadcast back over the input.

use candle_core::{DType, Result, Tensor, D};

use crate::broadcast::expand_first;

/// Variance floor added before the square root.
pub const DEFAULT_EPS: f64 = 1e-5;

/// Per-feature mean and standard deviation along the sequence axis.
///
/// The variance is unbiased (divides by `seq - 1`), so a sequence of length
/// one yields a non-finite std.
pub fn calc_mean_std(feat: &Tensor, eps: f64) -> Result<(Tensor, Tensor)> {
    let std = (feat.var_keepdim(D::Minus2)? + eps)?.sqrt()?;
    let mean = feat.mean_keepdim(D::Minus2)?;
    Ok((mean, std))
}

/// Re-normalises every batch element to the statistics of its half's style
/// element: `(x - mean) / std * style_std + style_mean`.
pub fn adain(feat: &Tensor) -> Result<Tensor> {
    let dtype = feat.dtype();
    let compute = match dtype {
        DType::F16 | DType::BF16 => feat.to_dtype(DType::F32)?,
        _ => feat.clone(),
    };

    let (mean, std) = calc_mean_std(&compute, DEFAULT_EPS)?;
    let style_mean = expand_first(&mean, 1.0)?;
    let style_std = expand_first(&std, 1.0)?;

    let normalized = compute.broadcast_sub(&mean)?.broadcast_div(&std)?;
    normalized
        .broadcast_mul(&style_std)?
        .broadcast_add(&style_mean)?
        .to_dtype(dtype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, IndexOp};

    fn ramp(batch: usize, seq: usize, features: usize) -> Result<Tensor> {
        let data = (0..batch * seq * features)
            .map(|i| {
                let b = i / (seq * features);
                let s = (i / features) % seq;
                let f = i % features;
                (b as f32 + 1.0) * 0.5 + (s as f32) * (0.3 + b as f32 * 0.2) - f as f32 * 0.1
            })
            .collect::<Vec<_>>();
        Tensor::from_vec(data, (batch, seq, features), &Device::Cpu)
    }

    fn values(t: &Tensor) -> Result<Vec<f32>> {
        t.flatten_all()?.to_vec1::<f32>()
    }

    fn assert_close(a: &Tensor, b: &Tensor, tol: f32) -> Result<()> {
        assert_eq!(a.dims(), b.dims());
        for (x, y) in values(a)?.iter().zip(values(b)?.iter()) {
            assert!((x - y).abs() < tol, "{x} vs {y}");
        }
        Ok(())
    }

    #[test]
    fn mean_std_keep_the_sequence_axis() -> Result<()> {
        let feat = Tensor::from_vec(
            vec![1.0f32, 10.0, 3.0, 20.0, 5.0, 30.0],
            (1, 3, 2),
            &Device::Cpu,
        )?;
        let (mean, std) = calc_mean_std(&feat, 0.0)?;
        assert_eq!(mean.dims(), &[1, 1, 2]);
        assert_eq!(std.dims(), &[1, 1, 2]);
        assert_eq!(values(&mean)?, vec![3.0, 20.0]);
        let std = values(&std)?;
        assert!((std[0] - 2.0).abs() < 1e-5);
        assert!((std[1] - 10.0).abs() < 1e-5);

        let (_, floored) = calc_mean_std(&Tensor::ones((1, 4, 1), DType::F32, &Device::Cpu)?, 1e-4)?;
        assert!((values(&floored)?[0] - 1e-2).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn adain_transfers_style_statistics() -> Result<()> {
        let feat = ramp(4, 6, 3)?;
        let styled = adain(&feat)?;
        let (mean, std) = calc_mean_std(&feat, DEFAULT_EPS)?;
        let (styled_mean, styled_std) = calc_mean_std(&styled, DEFAULT_EPS)?;

        for b in 0..4 {
            let source = if b < 2 { 0 } else { 2 };
            assert_close(&styled_mean.i(b)?, &mean.i(source)?, 1e-4)?;
            assert_close(&styled_std.i(b)?, &std.i(source)?, 1e-3)?;
        }
        Ok(())
    }

    #[test]
    fn adain_is_identity_on_style_elements() -> Result<()> {
        let feat = ramp(4, 5, 2)?;
        let styled = adain(&feat)?;
        assert_close(&styled.i(0)?, &feat.i(0)?, 1e-4)?;
        assert_close(&styled.i(2)?, &feat.i(2)?, 1e-4)?;
        Ok(())
    }

    #[test]
    fn adain_of_constant_sequences_collapses_to_style_mean() -> Result<()> {
        let data = (0..4)
            .flat_map(|b| vec![b as f32 + 1.0; 3 * 2])
            .collect::<Vec<_>>();
        let feat = Tensor::from_vec(data, (4, 3, 2), &Device::Cpu)?;
        let styled = values(&adain(&feat)?)?;
        for (i, value) in styled.iter().enumerate() {
            let expected = if i < 12 { 1.0 } else { 3.0 };
            assert!((value - expected).abs() < 1e-5, "index {i}: {value}");
        }
        Ok(())
    }

    #[test]
    fn adain_keeps_half_precision_dtype() -> Result<()> {
        let feat = ramp(2, 4, 2)?.to_dtype(DType::BF16)?;
        let styled = adain(&feat)?;
        assert_eq!(styled.dtype(), DType::BF16);
        assert_eq!(styled.dims(), feat.dims());
        Ok(())
    }
}
