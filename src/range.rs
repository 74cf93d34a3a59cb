use std::borrow::Borrow;

/// Ordered sub-range of an already sorted sequence of keys.
///
/// The view yields, in one linear pass, exactly the elements `k` with
/// `lower <= k <= upper`; a missing bound leaves that side open. It skips
/// elements below `lower` and stops at the first element past `upper`, so the
/// input must already be sorted: nothing past that point is ever inspected.
///
/// ```
/// use shell_dispatch::RangeView;
/// let keys = ["alias", "echo", "exit", "help"];
/// let tail: Vec<_> = RangeView::tail(keys.iter().copied(), "e").collect();
/// assert_eq!(tail, ["echo", "exit", "help"]);
/// ```
pub struct RangeView<'b, I, Q: ?Sized> {
    inner: I,
    lower: Option<&'b Q>,
    upper: Option<&'b Q>,
    positioned: bool,
    done: bool,
}

impl<'b, I, Q: ?Sized> RangeView<'b, I, Q> {
    /// Elements within `[lower, upper]`.
    pub fn new(inner: I, lower: Option<&'b Q>, upper: Option<&'b Q>) -> Self {
        Self {
            inner,
            lower,
            upper,
            positioned: lower.is_none(),
            done: false,
        }
    }

    /// Everything from `lower` (inclusive) to the end.
    pub fn tail(inner: I, lower: &'b Q) -> Self {
        Self::new(inner, Some(lower), None)
    }

    /// Everything from the start up to `upper` (inclusive).
    pub fn head(inner: I, upper: &'b Q) -> Self {
        Self::new(inner, None, Some(upper))
    }
}

impl<I, T, Q> Iterator for RangeView<'_, I, Q>
where
    I: Iterator<Item = T>,
    T: Borrow<Q>,
    Q: Ord + ?Sized,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        for item in self.inner.by_ref() {
            if !self.positioned {
                if let Some(lower) = self.lower {
                    if item.borrow() < lower {
                        continue;
                    }
                }
                self.positioned = true;
            }
            if let Some(upper) = self.upper {
                if item.borrow() > upper {
                    break;
                }
            }
            return Some(item);
        }
        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_closed_range_over_sorted_numbers() {
        let values = [1, 3, 5, 7, 9, 11];
        let got: Vec<i32> = RangeView::new(values.iter(), Some(&3), Some(&9))
            .copied()
            .collect();
        assert_eq!(got, vec![3, 5, 7, 9]);
    }

    #[test]
    fn test_bounds_between_elements() {
        let values = [1, 3, 5, 7];
        let got: Vec<i32> = RangeView::new(values.iter(), Some(&2), Some(&6))
            .copied()
            .collect();
        assert_eq!(got, vec![3, 5]);
    }

    #[test]
    fn test_open_sides() {
        let names: BTreeSet<String> = ["b", "d", "f"].iter().map(|s| s.to_string()).collect();

        let tail: Vec<&str> = RangeView::tail(names.iter().map(String::as_str), "c").collect();
        assert_eq!(tail, vec!["d", "f"]);

        let head: Vec<&str> = RangeView::head(names.iter().map(String::as_str), "d").collect();
        assert_eq!(head, vec!["b", "d"]);

        let all: Vec<&str> = RangeView::<_, str>::new(names.iter().map(String::as_str), None, None)
            .collect();
        assert_eq!(all, vec!["b", "d", "f"]);
    }

    #[test]
    fn test_stops_at_upper_bound_without_draining() {
        let mut visited = 0;
        let values = [1, 2, 3, 4, 5, 6];
        let got: Vec<i32> = RangeView::head(
            values.iter().inspect(|_| visited += 1),
            &2,
        )
        .copied()
        .collect();
        assert_eq!(got, vec![1, 2]);
        // 1, 2 and the first element past the bound
        assert_eq!(visited, 3);
    }

    #[test]
    fn test_empty_when_lower_past_everything() {
        let values = ["a", "b"];
        assert_eq!(RangeView::tail(values.iter().copied(), "z").count(), 0);
    }
}
