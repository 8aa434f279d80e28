//! `itertools.permutations`, `combinations` and `product`, materialised
//! as lists of tuples in Python's emission order.

use crate::value::Value;

pub fn permutations(pool: &[Value], r: usize) -> Vec<Value> {
    let mut out = Vec::new();
    if r > pool.len() {
        return out;
    }
    let mut used = vec![false; pool.len()];
    let mut current = Vec::with_capacity(r);
    permute(pool, r, &mut used, &mut current, &mut out);
    out
}

fn permute(
    pool: &[Value],
    r: usize,
    used: &mut [bool],
    current: &mut Vec<Value>,
    out: &mut Vec<Value>,
) {
    if current.len() == r {
        out.push(Value::tuple(current.clone()));
        return;
    }
    for i in 0..pool.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        current.push(pool[i].clone());
        permute(pool, r, used, current, out);
        current.pop();
        used[i] = false;
    }
}

pub fn combinations(pool: &[Value], r: usize) -> Vec<Value> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(r);
    combine(pool, r, 0, &mut current, &mut out);
    out
}

fn combine(pool: &[Value], r: usize, from: usize, current: &mut Vec<Value>, out: &mut Vec<Value>) {
    if current.len() == r {
        out.push(Value::tuple(current.clone()));
        return;
    }
    let needed = r - current.len();
    for i in from..pool.len() {
        if pool.len() - i < needed {
            break;
        }
        current.push(pool[i].clone());
        combine(pool, r, i + 1, current, out);
        current.pop();
    }
}

/// Cartesian product; the rightmost pool varies fastest.
pub fn product(pools: &[Vec<Value>]) -> Vec<Value> {
    let mut rows: Vec<Vec<Value>> = vec![Vec::new()];
    for pool in pools {
        let mut next = Vec::with_capacity(rows.len() * pool.len());
        for row in &rows {
            for item in pool {
                let mut extended = row.clone();
                extended.push(item.clone());
                next.push(extended);
            }
        }
        rows = next;
    }
    rows.into_iter().map(Value::tuple).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: i64) -> Vec<Value> {
        (0..n).map(Value::Int).collect()
    }

    fn render(values: &[Value]) -> String {
        Value::list(values.to_vec()).to_string()
    }

    #[test]
    fn test_permutations_order() {
        assert_eq!(
            render(&permutations(&pool(3), 2)),
            "[(0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1)]"
        );
        assert!(permutations(&pool(2), 3).is_empty());
        assert_eq!(permutations(&pool(3), 0).len(), 1);
    }

    #[test]
    fn test_combinations_order() {
        assert_eq!(render(&combinations(&pool(4), 2)).matches('(').count(), 6);
        assert_eq!(render(&combinations(&pool(3), 2)), "[(0, 1), (0, 2), (1, 2)]");
        assert!(combinations(&pool(1), 2).is_empty());
    }

    #[test]
    fn test_product() {
        let pools = vec![pool(2), vec![Value::str("a"), Value::str("b")]];
        assert_eq!(
            render(&product(&pools)),
            "[(0, \"a\"), (0, \"b\"), (1, \"a\"), (1, \"b\")]"
        );
        assert_eq!(product(&[]).len(), 1);
        assert!(product(&[pool(2), Vec::new()]).is_empty());
    }
}
