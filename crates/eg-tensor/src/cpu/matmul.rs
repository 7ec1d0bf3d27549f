use crate::error::{Result, TensorError};

fn check_len(op: &str, name: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(TensorError::Other(format!(
            "{}: {}.len()={} but expected {}",
            op, name, len, expected
        )));
    }
    Ok(())
}

/// Naive row-major f32 matmul, [m, k] @ [k, n].
pub fn matmul_f32(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
    check_len("matmul", "a", a.len(), m * k)?;
    check_len("matmul", "b", b.len(), k * n)?;

    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for p in 0..k {
            let av = a[i * k + p];
            if av == 0.0 {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            let c_row = &mut c[i * n..(i + 1) * n];
            for (cv, bv) in c_row.iter_mut().zip(b_row) {
                *cv += av * bv;
            }
        }
    }
    Ok(c)
}

/// Fixed-point matmul against a transposed right operand, [m, k] @ [n, k]ᵀ.
///
/// Products accumulate in i64 and are scaled by `unquant` once per output.
pub fn matmul_i16_nt(
    a: &[i16],
    b: &[i16],
    m: usize,
    k: usize,
    n: usize,
    unquant: f32,
) -> Result<Vec<f32>> {
    check_len("matmul_i16", "a", a.len(), m * k)?;
    check_len("matmul_i16", "b", b.len(), n * k)?;

    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let b_row = &b[j * k..(j + 1) * k];
            let acc: i64 = a_row
                .iter()
                .zip(b_row)
                .map(|(&x, &y)| i64::from(x) * i64::from(y))
                .sum();
            c[i * n + j] = acc as f32 * unquant;
        }
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_f32() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![5.0, 6.0, 7.0, 8.0];
        let c = matmul_f32(&a, &b, 2, 2, 2).unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_i16_transposed() {
        // a = [1,2;3,4], b holds [5,7;6,8] so that b^T = [5,6;7,8].
        let a = vec![1, 2, 3, 4];
        let b = vec![5, 7, 6, 8];
        let c = matmul_i16_nt(&a, &b, 2, 2, 2, 1.0).unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
        let half = matmul_i16_nt(&a, &b, 2, 2, 2, 0.5).unwrap();
        assert_eq!(half[0], 9.5);
    }

    #[test]
    fn test_length_check() {
        assert!(matmul_f32(&[1.0], &[1.0, 2.0], 1, 1, 1).is_err());
        assert!(matmul_i16_nt(&[1, 2], &[1], 1, 2, 1, 1.0).is_err());
    }
}
