use candle_core::{DType, Device, Result, Tensor};
use embedding::positional::{PositionalEncoding, PositionalEncodingConfig};
use layers::PrecisionPolicy;

fn build(d_model: usize, max_len: usize, dropout_p: f32) -> Result<PositionalEncoding> {
    PositionalEncoding::new(
        PositionalEncodingConfig::new(d_model, dropout_p).with_max_len(max_len),
        17,
        &Device::Cpu,
        DType::F32,
    )
}

#[test]
fn position_zero_alternates_zero_and_one() -> Result<()> {
    let pe = build(8, 10, 0.1)?;
    let first = pe.encoding(1)?.squeeze(0)?.to_vec1::<f32>()?;
    assert_eq!(first, vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
    Ok(())
}

#[test]
fn values_are_bounded_and_first_channel_is_sin_of_position() -> Result<()> {
    let pe = build(6, 50, 0.0)?;
    let rows = pe.encoding(50)?.to_vec2::<f32>()?;
    for (position, row) in rows.iter().enumerate() {
        assert!(row.iter().all(|v| v.abs() <= 1.0));
        assert!((row[0] - (position as f32).sin()).abs() < 1e-4);
        assert!((row[1] - (position as f32).cos()).abs() < 1e-4);
    }
    Ok(())
}

#[test]
fn eval_forward_adds_signal_to_input() -> Result<()> {
    let pe = build(4, 16, 0.5)?;
    pe.set_training(false);
    let input = Tensor::ones((2, 5, 4), DType::F32, &Device::Cpu)?;

    let output = pe.forward(&input, &PrecisionPolicy::default())?;
    let expected = input.broadcast_add(&pe.encoding(5)?)?;
    let diff = output.sub(&expected)?.abs()?.max_all()?.to_vec0::<f32>()?;
    assert_eq!(diff, 0.0);
    Ok(())
}

#[test]
fn training_forward_applies_dropout() -> Result<()> {
    let pe = build(32, 16, 0.5)?;
    let input = Tensor::ones((2, 8, 32), DType::F32, &Device::Cpu)?;
    let output = pe.forward(&input, &PrecisionPolicy::default())?;
    let zeros = output
        .flatten_all()?
        .to_vec1::<f32>()?
        .iter()
        .filter(|v| **v == 0.0)
        .count();
    assert!(zeros > 0);
    Ok(())
}

#[test]
fn longer_than_max_len_is_an_error() -> Result<()> {
    let pe = build(4, 3, 0.0)?;
    let input = Tensor::zeros((1, 4, 4), DType::F32, &Device::Cpu)?;
    let err = pe.forward(&input, &PrecisionPolicy::default()).unwrap_err();
    assert!(err.to_string().contains("exceeds max_len"));
    assert!(pe.encoding(4).is_err());
    Ok(())
}

#[test]
fn zero_width_is_rejected() {
    assert!(build(0, 3, 0.0).is_err());
}
