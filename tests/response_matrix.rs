use irt_calibrate::calibrate::ability::initial_abilities;
use irt_calibrate::calibrate::layout::{AreaLayout, ItemPlacement, LanguageOption};
use irt_calibrate::calibrate::matrix::{ExamineeRecord, MatrixBuilder, ResponseMatrix};
use irt_calibrate::calibrate::types::ResponseCell;

fn placement(form: i64, position: u32, item: i64) -> ItemPlacement {
    ItemPlacement {
        form,
        position,
        item,
        language: None,
    }
}

fn examinee(id: &str, form: i64, answers: &str, key: &str) -> ExamineeRecord {
    ExamineeRecord {
        id: id.to_string(),
        form,
        language: None,
        score: 500.0,
        answers: answers.to_string(),
        key: key.to_string(),
    }
}

fn correctness(row: ndarray::ArrayView1<ResponseCell>) -> Vec<i8> {
    row.iter()
        .map(|cell| match cell {
            ResponseCell::Correct => 1,
            ResponseCell::Incorrect => 0,
            ResponseCell::NotAdministered => -1,
        })
        .collect()
}

#[test]
fn three_item_scenario_scores_and_initializes() {
    let layout =
        AreaLayout::from_placements(&[placement(1, 1, 11), placement(1, 2, 12), placement(1, 3, 13)])
            .unwrap();
    let records: Vec<ExamineeRecord> = ["ABC", "ABX", "XXX", "ABC"]
        .iter()
        .enumerate()
        .map(|(j, answers)| examinee(&j.to_string(), 1, answers, "ABC"))
        .collect();

    let built = MatrixBuilder::new(&layout).build(&records);
    let rows: Vec<Vec<i8>> = (0..4).map(|j| correctness(built.matrix.row(j))).collect();
    assert_eq!(
        rows,
        vec![vec![1, 1, 1], vec![1, 1, 0], vec![0, 0, 0], vec![1, 1, 1]]
    );

    let init = initial_abilities(&built.matrix);
    // Correct counts are 3, 2, 0 and 3.
    assert_eq!(init.raw_mean, 2.0);
    let lowest = init
        .theta
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(j, _)| j);
    assert_eq!(lowest, Some(2));
    assert!(init.theta[2] < init.theta[1]);
}

/// Forty-five positions: fixed items at 1-5 and 11-45, a language block at 6-10
/// present once per language. Answer strings hold fifty characters.
fn variant_layout() -> AreaLayout {
    let mut placements = Vec::new();
    for position in (1..=5).chain(11..=45) {
        placements.push(placement(1, position, 1000 + position as i64));
    }
    for position in 6..=10 {
        placements.push(ItemPlacement {
            form: 1,
            position,
            item: 2000 + position as i64,
            language: Some(LanguageOption::English),
        });
        placements.push(ItemPlacement {
            form: 1,
            position,
            item: 3000 + position as i64,
            language: Some(LanguageOption::Spanish),
        });
    }
    AreaLayout::from_placements(&placements).unwrap()
}

#[test]
fn variant_choice_masks_the_other_block() {
    let layout = variant_layout();
    assert!(layout.has_variants());
    assert_eq!(layout.items().len(), 50);

    // Fixed 1-5, English 6-10, Spanish 6-10, fixed 11-45.
    let key = format!("{}{}{}{}", "A".repeat(5), "B".repeat(5), "C".repeat(5), "D".repeat(35));
    // The English block holds the Spanish key so it would score as wrong if read.
    let answers = format!("{}{}{}{}", "A".repeat(5), "C".repeat(5), "C".repeat(5), "D".repeat(35));
    let mut record = examinee("spanish", 1, &answers, &key);
    record.language = Some(LanguageOption::Spanish);

    let row = MatrixBuilder::new(&layout).score_row(&record).unwrap();
    let items = layout.items();
    for position in 6..=10 {
        let english = items.column(2000 + position).unwrap();
        let spanish = items.column(3000 + position).unwrap();
        assert_eq!(row[english], ResponseCell::NotAdministered);
        assert_eq!(row[spanish], ResponseCell::Correct);
    }
    for position in (1..=5).chain(11..=45) {
        let fixed = items.column(1000 + position).unwrap();
        assert_eq!(row[fixed], ResponseCell::Correct);
    }
    assert_eq!(row.iter().filter(|c| c.is_administered()).count(), 45);

    let mut english = record.clone();
    english.language = Some(LanguageOption::English);
    let row = MatrixBuilder::new(&layout).score_row(&english).unwrap();
    let first_english = items.column(2006).unwrap();
    assert_eq!(row[first_english], ResponseCell::Incorrect);
    assert_eq!(row[items.column(3006).unwrap()], ResponseCell::NotAdministered);

    let mut undecided = record;
    undecided.language = None;
    let built = MatrixBuilder::new(&layout).build(&[undecided]);
    assert_eq!(built.summary.malformed_rows, 1);
    assert_eq!(built.matrix.n_examinees(), 0);
}

#[test]
fn not_administered_counts_follow_form_membership() {
    // Form 1 holds items 1-3, form 2 holds items 2-4 in another order.
    let layout = AreaLayout::from_placements(&[
        placement(1, 1, 1),
        placement(1, 2, 2),
        placement(1, 3, 3),
        placement(2, 1, 4),
        placement(2, 2, 3),
        placement(2, 3, 2),
    ])
    .unwrap();
    let records = vec![
        examinee("a", 1, "ABC", "ABC"),
        examinee("b", 1, "AAA", "ABC"),
        examinee("c", 2, "CBA", "CBA"),
        examinee("d", 2, "CCC", "CBA"),
        examinee("e", 2, "ABA", "CBA"),
    ];
    let built = MatrixBuilder::new(&layout).build(&records);
    assert_not_administered_complements_takers(&layout, &records, &built.matrix);
    assert_eq!(built.matrix.not_administered_counts().to_vec(), vec![3, 0, 0, 2]);
}

#[test]
fn not_administered_counts_respect_language_choice() {
    let layout = variant_layout();
    let key = "ABCDE".repeat(10);
    let records: Vec<ExamineeRecord> = (0..7)
        .map(|j| {
            // Never the sentinel, so every active slot is administered.
            let answers: String = key
                .chars()
                .enumerate()
                .map(|(k, c)| if (j + k) % 3 == 0 { 'X' } else { c })
                .collect();
            let mut record = examinee(&format!("{j:03}"), 1, &answers, &key);
            record.language = Some(if j < 3 {
                LanguageOption::English
            } else {
                LanguageOption::Spanish
            });
            record
        })
        .collect();

    let built = MatrixBuilder::new(&layout).build(&records);
    assert_eq!(built.matrix.n_examinees(), 7);
    assert_not_administered_complements_takers(&layout, &records, &built.matrix);

    let counts = built.matrix.not_administered_counts();
    let items = layout.items();
    for position in 6..=10 {
        // Three English takers, four Spanish takers.
        assert_eq!(counts[items.column(2000 + position).unwrap()], 4);
        assert_eq!(counts[items.column(3000 + position).unwrap()], 3);
    }
    assert_eq!(counts[items.column(1001).unwrap()], 0);
    assert_eq!(counts[items.column(1045).unwrap()], 0);
}

/// Each item is not administered to exactly the examinees whose effective form, under
/// their own language choice, does not contain it.
fn assert_not_administered_complements_takers(
    layout: &AreaLayout,
    records: &[ExamineeRecord],
    matrix: &ResponseMatrix,
) {
    let total = matrix.n_examinees();
    assert_eq!(total, records.len());
    let takes = |record: &ExamineeRecord, column: usize| -> bool {
        let form = layout.form(record.form).unwrap();
        let [base, extra] = form.active_slots(record.form, record.language).unwrap();
        base.iter().chain(extra).any(|slot| slot.column == column)
    };

    let counts = matrix.not_administered_counts();
    for (column, &item) in layout.items().ids().iter().enumerate() {
        let takers = records.iter().filter(|r| takes(r, column)).count();
        assert_eq!(counts[column], total - takers, "item {item}");
    }
}

#[test]
fn rebuilding_yields_an_identical_matrix() {
    let layout = variant_layout();
    let key = "ABCDE".repeat(10);
    let records: Vec<ExamineeRecord> = (0..20)
        .map(|j| {
            let answers: String = key
                .chars()
                .enumerate()
                .map(|(k, c)| match (j + k) % 7 {
                    0 => '9',
                    1 | 2 => 'E',
                    _ => c,
                })
                .collect();
            let mut record = examinee(&format!("{j:03}"), 1, &answers, &key);
            record.language = LanguageOption::from_code((j % 2) as i64);
            record
        })
        .collect();

    let builder = MatrixBuilder::new(&layout);
    let first = builder.build(&records);
    let second = builder.build(&records);
    assert_eq!(first, second);
    assert_eq!(first.matrix.n_examinees(), 20);
}
