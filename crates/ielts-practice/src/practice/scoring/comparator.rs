use super::super::domain::QuestionType;

const ALTERNATIVE_SEPARATOR: char = '|';

/// Decide whether a submitted response matches the reference answer for the given question type.
///
/// Absent inputs are never correct. Both sides are trimmed before comparison. Blank and
/// short-answer references may list several acceptable answers separated by `|`.
pub fn compare_answers(
    user_answer: Option<&str>,
    correct_answer: Option<&str>,
    question_type: &QuestionType,
) -> bool {
    let (Some(user_answer), Some(correct_answer)) = (user_answer, correct_answer) else {
        return false;
    };

    let user = user_answer.trim();
    let correct = correct_answer.trim();

    match question_type {
        QuestionType::TrueFalseNotGiven | QuestionType::MultipleChoice => {
            user.to_uppercase() == correct.to_uppercase()
        }
        QuestionType::FillInBlank | QuestionType::ShortAnswer => {
            let user = user.to_lowercase();
            let correct = correct.to_lowercase();
            if correct.contains(ALTERNATIVE_SEPARATOR) {
                correct
                    .split(ALTERNATIVE_SEPARATOR)
                    .map(str::trim)
                    .any(|alternative| alternative == user)
            } else {
                user == correct
            }
        }
        _ => user.to_lowercase() == correct.to_lowercase(),
    }
}
