use crate::error::{BlockError, BoxError, Result};
use crate::stage::Stage;

type KeyFn<T, K> = Box<dyn FnMut(&T) -> std::result::Result<K, BoxError> + Send>;

/// Batches runs of adjacent items that share a key
///
/// Only one group is open at a time. A key that reappears after a different
/// key starts a new group rather than extending the earlier one.
pub struct GroupStage<T, K> {
    name: String,
    key_of: KeyFn<T, K>,
    open: Option<(K, Vec<T>)>,
}

impl<T, K: PartialEq> GroupStage<T, K> {
    pub fn new<F>(key_of: F) -> Self
    where
        F: FnMut(&T) -> std::result::Result<K, BoxError> + Send + 'static,
    {
        Self {
            name: "group_by".to_string(),
            key_of: Box::new(key_of),
            open: None,
        }
    }

    /// Name reported in logs and processing errors
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, K> Stage for GroupStage<T, K>
where
    T: Send + 'static,
    K: PartialEq + Send + 'static,
{
    type Input = T;
    type Output = Vec<T>;

    fn process(&mut self, item: T) -> Result<Vec<Vec<T>>> {
        let key = (self.key_of)(&item).map_err(|e| BlockError::processing(&self.name, e))?;

        if let Some((open_key, group)) = self.open.as_mut() {
            if *open_key == key {
                group.push(item);
                return Ok(Vec::new());
            }
        }

        Ok(self
            .open
            .replace((key, vec![item]))
            .map(|(_, finished)| finished)
            .into_iter()
            .collect())
    }

    fn on_complete(&mut self) -> Result<Vec<Vec<T>>> {
        Ok(self.open.take().map(|(_, group)| group).into_iter().collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<K: PartialEq + Send + 'static>(stage: &mut GroupStage<i32, K>, items: &[i32]) -> Vec<Vec<i32>> {
        let mut out = Vec::new();
        for item in items {
            out.extend(stage.process(*item).unwrap());
        }
        out.extend(stage.on_complete().unwrap());
        out
    }

    #[test]
    fn test_groups_adjacent_keys() {
        let mut stage = GroupStage::new(|i: &i32| Ok(i / 2));
        assert_eq!(run(&mut stage, &[1, 2, 3]), vec![vec![1], vec![2, 3]]);
    }

    #[test]
    fn test_repeated_key_starts_new_group() {
        let mut stage = GroupStage::new(|i: &i32| Ok(i % 2 == 0));
        assert_eq!(
            run(&mut stage, &[2, 4, 1, 6]),
            vec![vec![2, 4], vec![1], vec![6]]
        );
    }

    #[test]
    fn test_empty_input_emits_nothing() {
        let mut stage = GroupStage::new(|i: &i32| Ok(*i));
        assert!(run(&mut stage, &[]).is_empty());
    }

    #[test]
    fn test_selector_error() {
        let mut stage = GroupStage::<i32, i32>::new(|_| Err("bad key".into()));
        assert!(matches!(stage.process(1), Err(BlockError::Processing { .. })));
    }
}
