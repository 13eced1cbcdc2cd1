use crate::utils::errors::{PhasingError, PhasingResult};

/// A contiguous marker sub-range `[start, end)` whose genetic-map span is at
/// least the configured minimum (§4.B). Steps tile a window disjointly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub start: usize,
    pub end: usize,
}

impl Step {
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

#[derive(Debug, Clone)]
pub struct StepList {
    steps: Vec<Step>,
}

impl StepList {
    /// Greedily grow each step until its genetic span is `>= delta_cm`; the
    /// last two partial steps are merged (§4.B).
    pub fn build(gen_pos_cm: &[f64], delta_cm: f64) -> PhasingResult<Self> {
        let n = gen_pos_cm.len();
        if n == 0 {
            return Err(PhasingError::EmptyWindow);
        }
        debug_assert!(delta_cm > 0.0);

        let mut steps = Vec::new();
        let mut start = 0usize;
        while start < n {
            let mut end = start + 1;
            while end < n && gen_pos_cm[end - 1] - gen_pos_cm[start] < delta_cm {
                end += 1;
            }
            steps.push(Step { start, end });
            start = end;
        }
        if steps.len() >= 2 {
            let last = steps.pop().unwrap();
            let second_last = steps.pop().unwrap();
            steps.push(Step {
                start: second_last.start,
                end: last.end,
            });
        }
        Ok(StepList { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, t: usize) -> Step {
        self.steps[t]
    }

    pub fn iter(&self) -> impl Iterator<Item = Step> + '_ {
        self.steps.iter().copied()
    }

    /// Index of the step containing marker `m`, via binary search over
    /// `start` offsets.
    pub fn step_at_marker(&self, m: usize) -> usize {
        match self.steps.binary_search_by(|s| {
            if m < s.start {
                std::cmp::Ordering::Greater
            } else if m >= s.end {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Equal
            }
        }) {
            Ok(t) => t,
            Err(t) => t.min(self.steps.len() - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_cover_marker_range_with_no_overlap() {
        let gen_pos: Vec<f64> = (0..1000).map(|i| i as f64 * 0.001).collect();
        let steps = StepList::build(&gen_pos, 0.05).unwrap();
        assert!(!steps.is_empty());
        let mut expected_start = 0;
        for t in 0..steps.len() {
            let s = steps.step(t);
            assert_eq!(s.start, expected_start);
            assert!(s.len() >= 1);
            expected_start = s.end;
        }
        assert_eq!(expected_start, gen_pos.len());
    }

    #[test]
    fn single_marker_window_yields_single_step() {
        let steps = StepList::build(&[0.0], 0.05).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps.step(0), Step { start: 0, end: 1 });
    }

    #[test]
    fn step_at_marker_finds_containing_step() {
        let gen_pos: Vec<f64> = (0..100).map(|i| i as f64 * 0.001).collect();
        let steps = StepList::build(&gen_pos, 0.02).unwrap();
        for m in 0..gen_pos.len() {
            let t = steps.step_at_marker(m);
            let s = steps.step(t);
            assert!(m >= s.start && m < s.end);
        }
    }
}
