/// `prefix ++ core ++ suffix`. Affix values are taken as-is.
pub fn compose<T: Copy>(prefix: &[T], core: &[T], suffix: &[T]) -> Vec<T> {
    compose_with(prefix, core, suffix, |&id| id)
}

/// Like [`compose`], mapping each core element on the way in.
pub fn compose_with<S, T, F>(prefix: &[T], core: &[S], suffix: &[T], map: F) -> Vec<T>
where
    T: Copy,
    F: FnMut(&S) -> T,
{
    let mut out = Vec::with_capacity(prefix.len() + core.len() + suffix.len());
    out.extend_from_slice(prefix);
    out.extend(core.iter().map(map));
    out.extend_from_slice(suffix);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_core() {
        assert_eq!(compose(&[1], &[7, 8, 9], &[2, 0]), vec![1, 7, 8, 9, 2, 0]);
    }

    #[test]
    fn empty_affixes_leave_core() {
        assert_eq!(compose::<i32>(&[], &[5, 6], &[]), vec![5, 6]);
        assert_eq!(compose::<i64>(&[3], &[], &[4]), vec![3, 4]);
    }

    #[test]
    fn maps_core_only() {
        let out = compose_with(&[-1i64], &[1i32, 2], &[100], |&id| i64::from(id) * 10);
        assert_eq!(out, vec![-1, 10, 20, 100]);
    }
}
